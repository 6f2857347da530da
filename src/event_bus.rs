/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Dispatch of [events](crate::events) to the handlers registered for them.
//!
//! A replica is driven by a single thread, so handlers run synchronously on that thread, in registration
//! order, right after the action the event describes.

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) execute_request_handlers: Vec<HandlerPtr<ExecuteRequestEvent>>,
    pub(crate) stabilize_checkpoint_handlers: Vec<HandlerPtr<StabilizeCheckpointEvent>>,
    pub(crate) buffer_request_handlers: Vec<HandlerPtr<BufferRequestEvent>>,
    pub(crate) prepare_handlers: Vec<HandlerPtr<PrepareEvent>>,
    pub(crate) commit_handlers: Vec<HandlerPtr<CommitEvent>>,
    pub(crate) speculative_execute_handlers: Vec<HandlerPtr<SpeculativeExecuteEvent>>,
    pub(crate) checkpoint_handlers: Vec<HandlerPtr<CheckpointEvent>>,
    pub(crate) view_change_handlers: Vec<HandlerPtr<ViewChangeEvent>>,
    pub(crate) new_view_handlers: Vec<HandlerPtr<NewViewEvent>>,
    pub(crate) receive_request_handlers: Vec<HandlerPtr<ReceiveRequestEvent>>,
    pub(crate) receive_prepare_handlers: Vec<HandlerPtr<ReceivePrepareEvent>>,
    pub(crate) receive_commit_handlers: Vec<HandlerPtr<ReceiveCommitEvent>>,
    pub(crate) receive_checkpoint_handlers: Vec<HandlerPtr<ReceiveCheckpointEvent>>,
    pub(crate) receive_view_change_handlers: Vec<HandlerPtr<ReceiveViewChangeEvent>>,
    pub(crate) receive_new_view_handlers: Vec<HandlerPtr<ReceiveNewViewEvent>>,
    pub(crate) start_view_handlers: Vec<HandlerPtr<StartViewEvent>>,
    pub(crate) timeout_handlers: Vec<HandlerPtr<TimeoutEvent>>,
    pub(crate) conflicting_commit_handlers: Vec<HandlerPtr<ConflictingCommitEvent>>,
}

impl EventHandlers {
    /// Register the default [logger](Logger) of every event kind.
    pub(crate) fn add_loggers(&mut self) {
        self.execute_request_handlers.push(ExecuteRequestEvent::get_logger());
        self.stabilize_checkpoint_handlers.push(StabilizeCheckpointEvent::get_logger());
        self.buffer_request_handlers.push(BufferRequestEvent::get_logger());
        self.prepare_handlers.push(PrepareEvent::get_logger());
        self.commit_handlers.push(CommitEvent::get_logger());
        self.speculative_execute_handlers.push(SpeculativeExecuteEvent::get_logger());
        self.checkpoint_handlers.push(CheckpointEvent::get_logger());
        self.view_change_handlers.push(ViewChangeEvent::get_logger());
        self.new_view_handlers.push(NewViewEvent::get_logger());
        self.receive_request_handlers.push(ReceiveRequestEvent::get_logger());
        self.receive_prepare_handlers.push(ReceivePrepareEvent::get_logger());
        self.receive_commit_handlers.push(ReceiveCommitEvent::get_logger());
        self.receive_checkpoint_handlers.push(ReceiveCheckpointEvent::get_logger());
        self.receive_view_change_handlers.push(ReceiveViewChangeEvent::get_logger());
        self.receive_new_view_handlers.push(ReceiveNewViewEvent::get_logger());
        self.start_view_handlers.push(StartViewEvent::get_logger());
        self.timeout_handlers.push(TimeoutEvent::get_logger());
        self.conflicting_commit_handlers.push(ConflictingCommitEvent::get_logger());
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::ExecuteRequest(execute_request_event) => {
                self.execute_request_handlers.iter().for_each(|handler| handler(&execute_request_event))
            }

            Event::StabilizeCheckpoint(stabilize_checkpoint_event) => {
                self.stabilize_checkpoint_handlers.iter().for_each(|handler| handler(&stabilize_checkpoint_event))
            }

            Event::BufferRequest(buffer_request_event) => {
                self.buffer_request_handlers.iter().for_each(|handler| handler(&buffer_request_event))
            }

            Event::Prepare(prepare_event) => {
                self.prepare_handlers.iter().for_each(|handler| handler(&prepare_event))
            }

            Event::Commit(commit_event) => {
                self.commit_handlers.iter().for_each(|handler| handler(&commit_event))
            }

            Event::SpeculativeExecute(speculative_execute_event) => {
                self.speculative_execute_handlers.iter().for_each(|handler| handler(&speculative_execute_event))
            }

            Event::Checkpoint(checkpoint_event) => {
                self.checkpoint_handlers.iter().for_each(|handler| handler(&checkpoint_event))
            }

            Event::ViewChange(view_change_event) => {
                self.view_change_handlers.iter().for_each(|handler| handler(&view_change_event))
            }

            Event::NewView(new_view_event) => {
                self.new_view_handlers.iter().for_each(|handler| handler(&new_view_event))
            }

            Event::ReceiveRequest(receive_request_event) => {
                self.receive_request_handlers.iter().for_each(|handler| handler(&receive_request_event))
            }

            Event::ReceivePrepare(receive_prepare_event) => {
                self.receive_prepare_handlers.iter().for_each(|handler| handler(&receive_prepare_event))
            }

            Event::ReceiveCommit(receive_commit_event) => {
                self.receive_commit_handlers.iter().for_each(|handler| handler(&receive_commit_event))
            }

            Event::ReceiveCheckpoint(receive_checkpoint_event) => {
                self.receive_checkpoint_handlers.iter().for_each(|handler| handler(&receive_checkpoint_event))
            }

            Event::ReceiveViewChange(receive_view_change_event) => {
                self.receive_view_change_handlers.iter().for_each(|handler| handler(&receive_view_change_event))
            }

            Event::ReceiveNewView(receive_new_view_event) => {
                self.receive_new_view_handlers.iter().for_each(|handler| handler(&receive_new_view_event))
            }

            Event::StartView(start_view_event) => {
                self.start_view_handlers.iter().for_each(|handler| handler(&start_view_event))
            }

            Event::Timeout(timeout_event) => {
                self.timeout_handlers.iter().for_each(|handler| handler(&timeout_event))
            }

            Event::ConflictingCommit(conflicting_commit_event) => {
                self.conflicting_commit_handlers.iter().for_each(|handler| handler(&conflicting_commit_event))
            }
        }
    }
}
