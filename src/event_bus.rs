/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which passes [events](crate::events) to the handlers registered for them.

use crate::events::*;
use crate::logging::Logger;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::thread::JoinHandle;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Handlers for each kind of event: the default logger if event logging is enabled, followed by the
/// handler the user registered, if any.
pub(crate) struct EventHandlers {
    pub(crate) accept_ledger_handlers: Vec<HandlerPtr<AcceptLedgerEvent>>,
    pub(crate) fully_validated_handlers: Vec<HandlerPtr<FullyValidatedEvent>>,
    pub(crate) persist_ledger_handlers: Vec<HandlerPtr<PersistLedgerEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) validate_handlers: Vec<HandlerPtr<ValidateEvent>>,
    pub(crate) receive_position_handlers: Vec<HandlerPtr<ReceivePositionEvent>>,
    pub(crate) receive_validation_handlers: Vec<HandlerPtr<ReceiveValidationEvent>>,
    pub(crate) reject_message_handlers: Vec<HandlerPtr<RejectMessageEvent>>,
    pub(crate) start_round_handlers: Vec<HandlerPtr<StartRoundEvent>>,
    pub(crate) close_ledger_handlers: Vec<HandlerPtr<CloseLedgerEvent>>,
    pub(crate) create_dispute_handlers: Vec<HandlerPtr<CreateDisputeEvent>>,
    pub(crate) mode_change_handlers: Vec<HandlerPtr<ModeChangeEvent>>,
    pub(crate) consensus_reached_handlers: Vec<HandlerPtr<ConsensusReachedEvent>>,
    pub(crate) consensus_timeout_handlers: Vec<HandlerPtr<ConsensusTimeoutEvent>>,
    pub(crate) switch_ledger_handlers: Vec<HandlerPtr<SwitchLedgerEvent>>,
    pub(crate) equivocation_handlers: Vec<HandlerPtr<EquivocationEvent>>,
    pub(crate) start_acquire_handlers: Vec<HandlerPtr<StartAcquireEvent>>,
    pub(crate) end_acquire_handlers: Vec<HandlerPtr<EndAcquireEvent>>,
    pub(crate) receive_node_request_handlers: Vec<HandlerPtr<ReceiveNodeRequestEvent>>,
    pub(crate) send_node_response_handlers: Vec<HandlerPtr<SendNodeResponseEvent>>,
}

/// The user-registered handler for each kind of event, as collected by the
/// [`ReplicaSpec`](crate::replica::ReplicaSpec) builder.
#[derive(Default)]
pub(crate) struct UserHandlers {
    pub(crate) on_accept_ledger: Option<HandlerPtr<AcceptLedgerEvent>>,
    pub(crate) on_fully_validated: Option<HandlerPtr<FullyValidatedEvent>>,
    pub(crate) on_persist_ledger: Option<HandlerPtr<PersistLedgerEvent>>,
    pub(crate) on_propose: Option<HandlerPtr<ProposeEvent>>,
    pub(crate) on_validate: Option<HandlerPtr<ValidateEvent>>,
    pub(crate) on_receive_position: Option<HandlerPtr<ReceivePositionEvent>>,
    pub(crate) on_receive_validation: Option<HandlerPtr<ReceiveValidationEvent>>,
    pub(crate) on_reject_message: Option<HandlerPtr<RejectMessageEvent>>,
    pub(crate) on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    pub(crate) on_close_ledger: Option<HandlerPtr<CloseLedgerEvent>>,
    pub(crate) on_create_dispute: Option<HandlerPtr<CreateDisputeEvent>>,
    pub(crate) on_mode_change: Option<HandlerPtr<ModeChangeEvent>>,
    pub(crate) on_consensus_reached: Option<HandlerPtr<ConsensusReachedEvent>>,
    pub(crate) on_consensus_timeout: Option<HandlerPtr<ConsensusTimeoutEvent>>,
    pub(crate) on_switch_ledger: Option<HandlerPtr<SwitchLedgerEvent>>,
    pub(crate) on_equivocation: Option<HandlerPtr<EquivocationEvent>>,
    pub(crate) on_start_acquire: Option<HandlerPtr<StartAcquireEvent>>,
    pub(crate) on_end_acquire: Option<HandlerPtr<EndAcquireEvent>>,
    pub(crate) on_receive_node_request: Option<HandlerPtr<ReceiveNodeRequestEvent>>,
    pub(crate) on_send_node_response: Option<HandlerPtr<SendNodeResponseEvent>>,
}

// The default logger (if enabled) goes first, then the user's handler.
fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    if let Some(handler) = user_handler {
        handlers.push(handler);
    }
    handlers
}

impl EventHandlers {
    pub(crate) fn new(log_events: bool, user_handlers: UserHandlers) -> EventHandlers {
        EventHandlers {
            accept_ledger_handlers: handlers(log_events, user_handlers.on_accept_ledger),
            fully_validated_handlers: handlers(log_events, user_handlers.on_fully_validated),
            persist_ledger_handlers: handlers(log_events, user_handlers.on_persist_ledger),
            propose_handlers: handlers(log_events, user_handlers.on_propose),
            validate_handlers: handlers(log_events, user_handlers.on_validate),
            receive_position_handlers: handlers(log_events, user_handlers.on_receive_position),
            receive_validation_handlers: handlers(log_events, user_handlers.on_receive_validation),
            reject_message_handlers: handlers(log_events, user_handlers.on_reject_message),
            start_round_handlers: handlers(log_events, user_handlers.on_start_round),
            close_ledger_handlers: handlers(log_events, user_handlers.on_close_ledger),
            create_dispute_handlers: handlers(log_events, user_handlers.on_create_dispute),
            mode_change_handlers: handlers(log_events, user_handlers.on_mode_change),
            consensus_reached_handlers: handlers(log_events, user_handlers.on_consensus_reached),
            consensus_timeout_handlers: handlers(log_events, user_handlers.on_consensus_timeout),
            switch_ledger_handlers: handlers(log_events, user_handlers.on_switch_ledger),
            equivocation_handlers: handlers(log_events, user_handlers.on_equivocation),
            start_acquire_handlers: handlers(log_events, user_handlers.on_start_acquire),
            end_acquire_handlers: handlers(log_events, user_handlers.on_end_acquire),
            receive_node_request_handlers: handlers(
                log_events,
                user_handlers.on_receive_node_request,
            ),
            send_node_response_handlers: handlers(log_events, user_handlers.on_send_node_response),
        }
    }

    /// Whether no handler at all is registered, in which case no event bus is started.
    pub(crate) fn is_empty(&self) -> bool {
        self.accept_ledger_handlers.is_empty()
            && self.fully_validated_handlers.is_empty()
            && self.persist_ledger_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.validate_handlers.is_empty()
            && self.receive_position_handlers.is_empty()
            && self.receive_validation_handlers.is_empty()
            && self.reject_message_handlers.is_empty()
            && self.start_round_handlers.is_empty()
            && self.close_ledger_handlers.is_empty()
            && self.create_dispute_handlers.is_empty()
            && self.mode_change_handlers.is_empty()
            && self.consensus_reached_handlers.is_empty()
            && self.consensus_timeout_handlers.is_empty()
            && self.switch_ledger_handlers.is_empty()
            && self.equivocation_handlers.is_empty()
            && self.start_acquire_handlers.is_empty()
            && self.end_acquire_handlers.is_empty()
            && self.receive_node_request_handlers.is_empty()
            && self.send_node_response_handlers.is_empty()
    }

    pub fn fire_handlers(&self, event: Event) {
        match event {
            Event::AcceptLedger(accept_ledger_event) => self
                .accept_ledger_handlers
                .iter()
                .for_each(|handler| handler(&accept_ledger_event)),

            Event::FullyValidated(fully_validated_event) => self
                .fully_validated_handlers
                .iter()
                .for_each(|handler| handler(&fully_validated_event)),

            Event::PersistLedger(persist_ledger_event) => self
                .persist_ledger_handlers
                .iter()
                .for_each(|handler| handler(&persist_ledger_event)),

            Event::Propose(propose_event) => self
                .propose_handlers
                .iter()
                .for_each(|handler| handler(&propose_event)),

            Event::Validate(validate_event) => self
                .validate_handlers
                .iter()
                .for_each(|handler| handler(&validate_event)),

            Event::ReceivePosition(receive_position_event) => self
                .receive_position_handlers
                .iter()
                .for_each(|handler| handler(&receive_position_event)),

            Event::ReceiveValidation(receive_validation_event) => self
                .receive_validation_handlers
                .iter()
                .for_each(|handler| handler(&receive_validation_event)),

            Event::RejectMessage(reject_message_event) => self
                .reject_message_handlers
                .iter()
                .for_each(|handler| handler(&reject_message_event)),

            Event::StartRound(start_round_event) => self
                .start_round_handlers
                .iter()
                .for_each(|handler| handler(&start_round_event)),

            Event::CloseLedger(close_ledger_event) => self
                .close_ledger_handlers
                .iter()
                .for_each(|handler| handler(&close_ledger_event)),

            Event::CreateDispute(create_dispute_event) => self
                .create_dispute_handlers
                .iter()
                .for_each(|handler| handler(&create_dispute_event)),

            Event::ModeChange(mode_change_event) => self
                .mode_change_handlers
                .iter()
                .for_each(|handler| handler(&mode_change_event)),

            Event::ConsensusReached(consensus_reached_event) => self
                .consensus_reached_handlers
                .iter()
                .for_each(|handler| handler(&consensus_reached_event)),

            Event::ConsensusTimeout(consensus_timeout_event) => self
                .consensus_timeout_handlers
                .iter()
                .for_each(|handler| handler(&consensus_timeout_event)),

            Event::SwitchLedger(switch_ledger_event) => self
                .switch_ledger_handlers
                .iter()
                .for_each(|handler| handler(&switch_ledger_event)),

            Event::Equivocation(equivocation_event) => self
                .equivocation_handlers
                .iter()
                .for_each(|handler| handler(&equivocation_event)),

            Event::StartAcquire(start_acquire_event) => self
                .start_acquire_handlers
                .iter()
                .for_each(|handler| handler(&start_acquire_event)),

            Event::EndAcquire(end_acquire_event) => self
                .end_acquire_handlers
                .iter()
                .for_each(|handler| handler(&end_acquire_event)),

            Event::ReceiveNodeRequest(receive_node_request_event) => self
                .receive_node_request_handlers
                .iter()
                .for_each(|handler| handler(&receive_node_request_event)),

            Event::SendNodeResponse(send_node_response_event) => self
                .send_node_response_handlers
                .iter()
                .for_each(|handler| handler(&send_node_response_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            // Every publisher (the algorithm thread and the node sync workers) has exited. Keep waiting
            // for the shutdown signal.
            Err(TryRecvError::Disconnected) => thread::yield_now(),
        }
    })
}
