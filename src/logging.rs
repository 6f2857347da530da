/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via replica's
//! [config](crate::replica::Configuration).
//!
//! hBFT-rs logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveCommit](crate::events::ReceiveCommitEvent) is printed:
//!
//! ```text
//! ReceiveCommit, 1701329264, 2, 1, 7, fNGCJyk
//! ```
//!
//! In the snippet:
//! - The third value is the replica that sent the commit.
//! - The fourth and fifth values are the view and the sequence number of the commit.
//! - The sixth value is the first seven characters of the Base64 encoding of the digest of the committed
//!   request.

use crate::{events::*, hbft::timers::Expiry, networking::messages::Origin};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;
use std::time::SystemTime;

// Names of each event in PascalCase for printing:
pub const EXECUTE_REQUEST: &str = "ExecuteRequest";
pub const STABILIZE_CHECKPOINT: &str = "StabilizeCheckpoint";
pub const BUFFER_REQUEST: &str = "BufferRequest";

pub const PREPARE: &str = "Prepare";
pub const COMMIT: &str = "Commit";
pub const SPECULATIVE_EXECUTE: &str = "SpeculativeExecute";
pub const CHECKPOINT: &str = "Checkpoint";
pub const VIEW_CHANGE: &str = "ViewChange";
pub const NEW_VIEW: &str = "NewView";

pub const RECEIVE_REQUEST: &str = "ReceiveRequest";
pub const RECEIVE_PREPARE: &str = "ReceivePrepare";
pub const RECEIVE_COMMIT: &str = "ReceiveCommit";
pub const RECEIVE_CHECKPOINT: &str = "ReceiveCheckpoint";
pub const RECEIVE_VIEW_CHANGE: &str = "ReceiveViewChange";
pub const RECEIVE_NEW_VIEW: &str = "ReceiveNewView";

pub const START_VIEW: &str = "StartView";
pub const TIMEOUT: &str = "Timeout";
pub const CONFLICTING_COMMIT: &str = "ConflictingCommit";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for ExecuteRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |execute_request_event: &ExecuteRequestEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                EXECUTE_REQUEST,
                secs_since_unix_epoch(execute_request_event.timestamp),
                execute_request_event.seq,
                execute_request_event.request.client,
                execute_request_event.request.timestamp,
                first_seven_base64_chars(&execute_request_event.request.digest().bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for StabilizeCheckpointEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |stabilize_checkpoint_event: &StabilizeCheckpointEvent| {
            log::info!(
                "{}, {}, {}, {}",
                STABILIZE_CHECKPOINT,
                secs_since_unix_epoch(stabilize_checkpoint_event.timestamp),
                stabilize_checkpoint_event.seq,
                first_seven_base64_chars(&stabilize_checkpoint_event.digest.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for BufferRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |buffer_request_event: &BufferRequestEvent| {
            log::info!(
                "{}, {}, {}, {}",
                BUFFER_REQUEST,
                secs_since_unix_epoch(buffer_request_event.timestamp),
                buffer_request_event.request.client,
                buffer_request_event.request.timestamp
            )
        };
        Box::new(logger)
    }
}

impl Logger for PrepareEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prepare_event: &PrepareEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PREPARE,
                secs_since_unix_epoch(prepare_event.timestamp),
                prepare_event.prepare.view,
                prepare_event.prepare.seq,
                first_seven_base64_chars(&prepare_event.prepare.digest.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_event: &CommitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT,
                secs_since_unix_epoch(commit_event.timestamp),
                commit_event.commit.view,
                commit_event.commit.seq,
                first_seven_base64_chars(&commit_event.commit.digest.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for SpeculativeExecuteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |speculative_execute_event: &SpeculativeExecuteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                SPECULATIVE_EXECUTE,
                secs_since_unix_epoch(speculative_execute_event.timestamp),
                speculative_execute_event.reply.view,
                speculative_execute_event.reply.seq,
                speculative_execute_event.reply.client,
                speculative_execute_event.reply.timestamp
            )
        };
        Box::new(logger)
    }
}

impl Logger for CheckpointEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |checkpoint_event: &CheckpointEvent| {
            log::info!(
                "{}, {}, {:?}, {}, {}",
                CHECKPOINT,
                secs_since_unix_epoch(checkpoint_event.timestamp),
                checkpoint_event.round,
                checkpoint_event.seq,
                first_seven_base64_chars(&checkpoint_event.digest.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ViewChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |view_change_event: &ViewChangeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                VIEW_CHANGE,
                secs_since_unix_epoch(view_change_event.timestamp),
                view_change_event.view_change.new_view,
                view_change_event.view_change.checkpoint.seq,
                view_change_event.view_change.speculative_requests.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for NewViewEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |new_view_event: &NewViewEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                NEW_VIEW,
                secs_since_unix_epoch(new_view_event.timestamp),
                new_view_event.new_view.new_view,
                new_view_event.new_view.view_changes.len(),
                new_view_event.new_view.checkpoint.seq,
                new_view_event.new_view.requests.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_request_event: &ReceiveRequestEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_REQUEST,
                secs_since_unix_epoch(receive_request_event.timestamp),
                origin_info(&receive_request_event.origin),
                receive_request_event.request.client,
                receive_request_event.request.timestamp
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceivePrepareEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_prepare_event: &ReceivePrepareEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PREPARE,
                secs_since_unix_epoch(receive_prepare_event.timestamp),
                receive_prepare_event.origin,
                receive_prepare_event.prepare.view,
                receive_prepare_event.prepare.seq,
                first_seven_base64_chars(&receive_prepare_event.prepare.digest.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveCommitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_commit_event: &ReceiveCommitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_COMMIT,
                secs_since_unix_epoch(receive_commit_event.timestamp),
                receive_commit_event.origin,
                receive_commit_event.commit.view,
                receive_commit_event.commit.seq,
                first_seven_base64_chars(&receive_commit_event.commit.digest.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveCheckpointEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_checkpoint_event: &ReceiveCheckpointEvent| {
            log::info!(
                "{}, {}, {}, {:?}, {}, {}",
                RECEIVE_CHECKPOINT,
                secs_since_unix_epoch(receive_checkpoint_event.timestamp),
                receive_checkpoint_event.origin,
                receive_checkpoint_event.round,
                receive_checkpoint_event.seq,
                first_seven_base64_chars(&receive_checkpoint_event.digest.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveViewChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_view_change_event: &ReceiveViewChangeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_VIEW_CHANGE,
                secs_since_unix_epoch(receive_view_change_event.timestamp),
                receive_view_change_event.origin,
                receive_view_change_event.view_change.new_view,
                receive_view_change_event.view_change.checkpoint.seq
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveNewViewEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_new_view_event: &ReceiveNewViewEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_NEW_VIEW,
                secs_since_unix_epoch(receive_new_view_event.timestamp),
                receive_new_view_event.origin,
                receive_new_view_event.new_view.new_view,
                receive_new_view_event.new_view.checkpoint.seq
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartViewEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_view_event: &StartViewEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_VIEW,
                secs_since_unix_epoch(start_view_event.timestamp),
                start_view_event.view,
                start_view_event.primary
            )
        };
        Box::new(logger)
    }
}

impl Logger for TimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |timeout_event: &TimeoutEvent| {
            log::info!(
                "{}, {}, {}",
                TIMEOUT,
                secs_since_unix_epoch(timeout_event.timestamp),
                expiry_info(&timeout_event.expiry)
            )
        };
        Box::new(logger)
    }
}

impl Logger for ConflictingCommitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |conflicting_commit_event: &ConflictingCommitEvent| {
            log::warn!(
                "{}, {}, {}, {}",
                CONFLICTING_COMMIT,
                secs_since_unix_epoch(conflicting_commit_event.timestamp),
                conflicting_commit_event.view,
                conflicting_commit_event.seq
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

fn origin_info(origin: &Origin) -> String {
    match origin {
        Origin::Replica(replica) => format!("replica {}", replica),
        Origin::Client(client) => format!("client {}", client),
    }
}

fn expiry_info(expiry: &Expiry) -> String {
    match expiry {
        Expiry::Request { key, target_view } => format!(
            "Request timer, client: {}, timestamp: {}, target view: {}",
            key.client, key.timestamp, target_view
        ),
        Expiry::Checkpoint => String::from("Checkpoint timer"),
        Expiry::ViewChange => String::from("View change timer"),
    }
}
