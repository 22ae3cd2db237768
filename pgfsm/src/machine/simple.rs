//! Simple query flow.
use super::{ErrorCallback, Held, Query, ResultCallback, Shared, unexpected};
use crate::{
    Error, Result,
    common::{debug, verbose},
    postgres::{BackendMessage, ProtocolError},
    resultset::{ResultBuffer, Resultset, RowDescription},
};

enum State {
    Waiting,
    FetchData(ResultBuffer),
}

/// A `Query` message in flight, it may contain several statements.
pub(crate) struct SimpleQuery {
    state: State,
    /// Last finished statement, delivered once it is known whether more follow.
    pending: Option<Resultset>,
    /// Keep the final result in `pending` instead of delivering it.
    hold: bool,
    on_result: ResultCallback,
    on_error: ErrorCallback,
}

impl SimpleQuery {
    pub(crate) fn start(query: Query, hold: bool, shared: &mut Shared) -> Self {
        shared.query(&query.sql);
        Self {
            state: State::Waiting,
            pending: None,
            hold,
            on_result: query.on_result,
            on_error: query.on_error,
        }
    }

    /// Returns `true` when the query is finished.
    pub(crate) fn handle(&mut self, msg: BackendMessage, shared: &mut Shared) -> Result<bool> {
        match msg {
            BackendMessage::RowDescription(desc) => {
                verbose!("SimpleQuery.Waiting -> SimpleQuery.FetchData");
                let desc = RowDescription::parse(desc)?;
                let buf = ResultBuffer::with_description(desc, shared.registry.clone());
                self.state = State::FetchData(buf);
            },
            BackendMessage::DataRow(row) => match &mut self.state {
                State::FetchData(buf) => buf.push(row)?,
                State::Waiting => {
                    return Err(ProtocolError::RowMismatch { expect: None, found: row.column_len }.into());
                },
            },
            BackendMessage::CommandComplete(cmd) => {
                let mut buf = match std::mem::replace(&mut self.state, State::Waiting) {
                    State::FetchData(buf) => buf,
                    State::Waiting => ResultBuffer::new(shared.registry.clone()),
                };
                debug!("{} ({} rows)", cmd.tag, buf.rows.len());
                buf.command_tag = Some(cmd.tag);
                self.push(Resultset::new(buf));
            },
            BackendMessage::EmptyQueryResponse(_) => {
                self.state = State::Waiting;
                self.push(Resultset::new(ResultBuffer::new(shared.registry.clone())));
            },
            BackendMessage::ReadyForQuery(_) => {
                let last = match self.pending.take() {
                    Some(last) => last,
                    None => Resultset::new(ResultBuffer::new(shared.registry.clone())),
                };
                if self.hold {
                    self.pending = Some(last);
                } else {
                    (self.on_result)(last, true);
                }
                return Ok(true);
            },
            msg => unexpected(&msg, "SimpleQuery"),
        }
        Ok(false)
    }

    /// Final result kept by a query started with `hold`.
    pub(crate) fn into_held(self) -> Option<Held> {
        let Self { pending, on_result, on_error, .. } = self;
        pending.map(|result| Held { result, on_result, on_error })
    }

    fn push(&mut self, result: Resultset) {
        if let Some(prev) = self.pending.replace(result) {
            (self.on_result)(prev, false);
        }
    }

    pub(crate) fn fail(self, err: impl Into<Error>) {
        if let Some(_prev) = &self.pending {
            debug!("result of an earlier statement discarded ({} rows)", _prev.len());
        }
        (self.on_error)(err.into())
    }
}
