//! Transaction level of the machine.
use std::collections::VecDeque;

use super::{
    ErrorCallback, Held, Query, Request, Shared, StartedCallback, Terminated, TransactionAborted,
    TransactionId, extended::ExtendedQuery, simple::SimpleQuery, unexpected,
};
use crate::{
    Error, Result,
    common::{debug, error, verbose},
    postgres::{BackendMessage, QueryError},
};

/// Request routed into a transaction.
pub(crate) enum TxRequest {
    Execute(Query),
    /// `COMMIT` when `commit` is true, `ROLLBACK` otherwise.
    Close { commit: bool },
}

impl TxRequest {
    fn into_request(self, id: TransactionId) -> Request {
        match self {
            TxRequest::Execute(query) => Request::Execute(query),
            TxRequest::Close { commit } => Request::Close { id, commit },
        }
    }
}

pub(crate) enum Step {
    Continue,
    /// Transaction ended, contains requests to replay at top level.
    Finished(VecDeque<Request>),
}

enum TxState {
    /// `BEGIN` sent.
    Starting { on_started: Option<StartedCallback> },
    Idle,
    Simple(SimpleQuery),
    Extended(ExtendedQuery),
    /// Query failed, waiting `ReadyForQuery` to roll back.
    Error,
    /// `COMMIT` or `ROLLBACK` sent.
    Exiting { aborted: bool },
}

pub(crate) struct Transaction {
    id: TransactionId,
    state: TxState,
    deferred: VecDeque<TxRequest>,
    on_error: Option<ErrorCallback>,
    /// Commit or rollback is requested, later requests stay at top level.
    closing: bool,
    /// Wraps a single top level query, whose result waits for `COMMIT`.
    implicit: bool,
    held: Option<Held>,
}

impl Transaction {
    /// Explicit transaction from a `begin` request.
    pub(crate) fn begin(
        id: TransactionId,
        on_started: StartedCallback,
        on_error: ErrorCallback,
        shared: &mut Shared,
    ) -> Self {
        shared.query("BEGIN");
        Self {
            id,
            state: TxState::Starting { on_started: Some(on_started) },
            deferred: VecDeque::new(),
            on_error: Some(on_error),
            closing: false,
            implicit: false,
            held: None,
        }
    }

    /// Implicit transaction wrapping one query.
    pub(crate) fn implicit(query: Query, shared: &mut Shared) -> Self {
        shared.query("BEGIN");
        Self {
            id: TransactionId::next(),
            state: TxState::Starting { on_started: None },
            deferred: VecDeque::from([TxRequest::Execute(query), TxRequest::Close { commit: true }]),
            on_error: None,
            closing: true,
            implicit: true,
            held: None,
        }
    }

    pub(crate) fn id(&self) -> TransactionId {
        self.id
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing
    }

    pub(crate) fn request(&mut self, req: TxRequest, shared: &mut Shared) {
        if let TxRequest::Close { .. } = req {
            self.closing = true;
        }

        if matches!(self.state, TxState::Idle) && self.deferred.is_empty() {
            self.dispatch(req, shared);
        } else {
            self.deferred.push_back(req);
        }
    }

    fn dispatch(&mut self, req: TxRequest, shared: &mut Shared) {
        match req {
            TxRequest::Execute(query) if query.params.is_some() => {
                if let Some(query) = ExtendedQuery::start(query, self.implicit, shared) {
                    verbose!("Transaction.Idle -> Transaction.ExtendedQuery");
                    self.state = TxState::Extended(query);
                }
            },
            TxRequest::Execute(query) => {
                verbose!("Transaction.Idle -> Transaction.SimpleQuery");
                self.state = TxState::Simple(SimpleQuery::start(query, self.implicit, shared));
            },
            TxRequest::Close { commit } => {
                shared.query(if commit { "COMMIT" } else { "ROLLBACK" });
                self.state = TxState::Exiting { aborted: false };
            },
        }
    }

    fn replay(&mut self, shared: &mut Shared) {
        while let TxState::Idle = self.state {
            let Some(req) = self.deferred.pop_front() else {
                break;
            };
            self.dispatch(req, shared);
        }
    }

    pub(crate) fn handle(&mut self, msg: BackendMessage, shared: &mut Shared) -> Result<Step> {
        if let BackendMessage::ErrorResponse(err) = msg {
            self.failed(QueryError::parse(err.body)?);
            return Ok(Step::Continue);
        }

        let ready = match &mut self.state {
            TxState::Starting { on_started } => match msg {
                BackendMessage::ReadyForQuery(_) => {
                    verbose!("Transaction.Starting -> Transaction.Idle");
                    if let Some(on_started) = on_started.take() {
                        on_started();
                    }
                    true
                },
                BackendMessage::CommandComplete(_) => false,
                msg => {
                    unexpected(&msg, "Transaction.Starting");
                    false
                },
            },
            TxState::Idle => {
                unexpected(&msg, "Transaction.Idle");
                false
            },
            TxState::Simple(query) => query.handle(msg, shared)?,
            TxState::Extended(query) => query.handle(msg, shared)?,
            TxState::Error => {
                if let BackendMessage::ReadyForQuery(_) = msg {
                    verbose!("Transaction.Error -> Transaction.Exiting");
                    shared.query("ROLLBACK");
                    self.state = TxState::Exiting { aborted: true };
                }
                false
            },
            TxState::Exiting { aborted } => match msg {
                BackendMessage::ReadyForQuery(_) => {
                    let aborted = *aborted;
                    return Ok(Step::Finished(self.finish(aborted)));
                },
                BackendMessage::CommandComplete(_cmd) => {
                    debug!("{}", _cmd.tag);
                    false
                },
                msg => {
                    unexpected(&msg, "Transaction.Exiting");
                    false
                },
            },
        };

        if ready {
            match std::mem::replace(&mut self.state, TxState::Idle) {
                TxState::Simple(query) => self.held = query.into_held(),
                TxState::Extended(query) => self.held = query.into_held(),
                _ => {},
            }
            self.replay(shared);
        }

        Ok(Step::Continue)
    }

    /// Server reported error, deliver it to the operation in flight.
    fn failed(&mut self, err: QueryError) {
        debug!("transaction error: {err}");

        match std::mem::replace(&mut self.state, TxState::Error) {
            TxState::Starting { .. } => self.report(err.into()),
            TxState::Simple(query) => query.fail(err),
            TxState::Extended(query) => query.fail(err),
            TxState::Idle | TxState::Error => {},
            TxState::Exiting { .. } => {
                match self.held.take() {
                    Some(held) => held.fail(err),
                    None => self.report(err.into()),
                }
                self.state = TxState::Exiting { aborted: true };
            },
        }
    }

    fn report(&mut self, err: Error) {
        match self.on_error.take() {
            Some(on_error) => on_error(err),
            None => {
                error!("transaction error: {err}");
            },
        }
    }

    fn finish(&mut self, aborted: bool) -> VecDeque<Request> {
        match self.held.take() {
            Some(held) if aborted => held.fail(TransactionAborted),
            Some(held) => held.deliver(),
            None => {},
        }

        let deferred = std::mem::take(&mut self.deferred);

        if !aborted {
            return deferred.into_iter().map(|req| req.into_request(self.id)).collect();
        }

        debug!("transaction rolled back");
        for req in deferred {
            if let TxRequest::Execute(query) = req {
                query.fail(TransactionAborted);
            }
        }
        VecDeque::new()
    }

    /// Connection terminated, fail everything in flight or queued.
    pub(crate) fn terminate(mut self) {
        match std::mem::replace(&mut self.state, TxState::Error) {
            TxState::Simple(query) => query.fail(Terminated),
            TxState::Extended(query) => query.fail(Terminated),
            _ => {},
        }

        if let Some(held) = self.held.take() {
            held.fail(Terminated);
        }

        for req in self.deferred.drain(..) {
            if let TxRequest::Execute(query) = req {
                query.fail(Terminated);
            }
        }

        if let Some(on_error) = self.on_error.take() {
            on_error(Terminated.into());
        }
    }
}
