//! Extended query flow.
//!
//! Each step ends with `Sync`, so a failure at any step is followed by `ReadyForQuery`.
use super::{ErrorCallback, Held, Query, ResultCallback, Shared, unexpected};
use crate::{
    Error, Result,
    common::{debug, verbose},
    encode::EncodedParams,
    postgres::{BackendMessage, ProtocolError, frontend},
    resultset::{ResultBuffer, Resultset, RowDescription},
    statement::{Prepared, Signature},
};

enum Phase {
    /// `Parse` and `Describe` sent.
    Parse,
    /// `Bind` sent.
    Bind,
    /// `Execute` sent, `None` once the result is delivered.
    Exec(Option<ResultBuffer>),
}

pub(crate) struct ExtendedQuery {
    phase: Phase,
    signature: Signature,
    params: EncodedParams,
    /// Keep the result in `held` instead of delivering it.
    hold: bool,
    held: Option<Resultset>,
    on_result: ResultCallback,
    on_error: ErrorCallback,
}

impl ExtendedQuery {
    /// Returns `None` when parameters fail to encode, in which case
    /// the error is delivered and nothing is sent.
    pub(crate) fn start(query: Query, hold: bool, shared: &mut Shared) -> Option<Self> {
        let Query { sql, params, on_result, on_error, .. } = query;
        let params = params.unwrap_or_default();

        let encoded = match params.encode(&shared.registry) {
            Ok(ok) => ok,
            Err(err) => {
                on_error(err.into());
                return None;
            },
        };

        let mut me = Self {
            phase: Phase::Parse,
            signature: Signature::new(&sql, params.types()),
            params: encoded,
            hold,
            held: None,
            on_result,
            on_error,
        };

        if shared.cache.contains(&me.signature) {
            verbose!("ExtendedQuery.Prepare -> ExtendedQuery.Bind, cached {}", me.signature);
            me.bind(shared);
        } else {
            verbose!("ExtendedQuery.Prepare -> ExtendedQuery.Parse");
            shared.send(frontend::Parse {
                prepare_name: me.signature.as_str(),
                sql: &sql,
                oids: params.types(),
            });
            shared.send(frontend::Describe { kind: b'S', name: me.signature.as_str() });
            shared.send(frontend::Sync);
        }

        Some(me)
    }

    fn bind(&mut self, shared: &mut Shared) {
        let result_formats = shared
            .cache
            .get(&self.signature)
            .and_then(Prepared::description)
            .map(RowDescription::formats)
            .unwrap_or_default();

        shared.send(frontend::Bind {
            portal_name: "",
            stmt_name: self.signature.as_str(),
            param_formats: &self.params.formats,
            params: &self.params.values,
            result_formats: &result_formats,
        });
        shared.send(frontend::Sync);
        self.phase = Phase::Bind;
    }

    /// Returns `true` when the query is finished.
    pub(crate) fn handle(&mut self, msg: BackendMessage, shared: &mut Shared) -> Result<bool> {
        match &mut self.phase {
            Phase::Parse => match msg {
                BackendMessage::ParseComplete(_) | BackendMessage::ParameterDescription(_) => {},
                BackendMessage::RowDescription(desc) => {
                    let desc = RowDescription::parse(desc)?.with_formats(&shared.registry);
                    shared.cache.insert(self.signature.clone(), Prepared::Described(desc));
                },
                BackendMessage::NoData(_) => {
                    shared.cache.insert(self.signature.clone(), Prepared::NoData);
                },
                BackendMessage::ReadyForQuery(_) => {
                    if !shared.cache.contains(&self.signature) {
                        return Err(ProtocolError::malformed("statement was not described").into());
                    }
                    verbose!("ExtendedQuery.Parse -> ExtendedQuery.Bind");
                    self.bind(shared);
                },
                msg => unexpected(&msg, "ExtendedQuery.Parse"),
            },
            Phase::Bind => match msg {
                BackendMessage::BindComplete(_) => {},
                BackendMessage::ReadyForQuery(_) => {
                    verbose!("ExtendedQuery.Bind -> ExtendedQuery.Exec");
                    shared.send(frontend::Execute { portal_name: "", max_row: 0 });
                    shared.send(frontend::Sync);

                    let registry = shared.registry.clone();
                    let buf = match shared.cache.get(&self.signature) {
                        Some(Prepared::Described(desc)) => {
                            ResultBuffer::with_description(desc.clone(), registry)
                        },
                        _ => ResultBuffer::new(registry),
                    };
                    self.phase = Phase::Exec(Some(buf));
                },
                msg => unexpected(&msg, "ExtendedQuery.Bind"),
            },
            Phase::Exec(buf) => match msg {
                BackendMessage::DataRow(row) => match buf {
                    Some(buf) => buf.push(row)?,
                    None => {
                        return Err(ProtocolError::RowMismatch { expect: None, found: row.column_len }.into());
                    },
                },
                BackendMessage::CommandComplete(cmd) => {
                    if let Some(mut buf) = buf.take() {
                        buf.command_tag = Some(cmd.tag);
                        self.deliver(buf);
                    }
                },
                BackendMessage::PortalSuspended(_) | BackendMessage::EmptyQueryResponse(_) => {
                    if let Some(buf) = buf.take() {
                        self.deliver(buf);
                    }
                },
                BackendMessage::ReadyForQuery(_) => {
                    if let Some(buf) = buf.take() {
                        self.deliver(buf);
                    }
                    return Ok(true);
                },
                msg => unexpected(&msg, "ExtendedQuery.Exec"),
            },
        }
        Ok(false)
    }

    fn deliver(&mut self, buf: ResultBuffer) {
        debug!(
            "{}: {} rows, {} columns",
            buf.command_tag.as_deref().unwrap_or(self.signature.as_str()),
            buf.rows.len(),
            buf.description().len(),
        );
        if self.hold {
            self.held = Some(Resultset::new(buf));
        } else {
            (self.on_result)(Resultset::new(buf), true);
        }
    }

    /// Result kept by a query started with `hold`.
    pub(crate) fn into_held(self) -> Option<Held> {
        let Self { held, on_result, on_error, .. } = self;
        held.map(|result| Held { result, on_result, on_error })
    }

    pub(crate) fn fail(self, err: impl Into<Error>) {
        (self.on_error)(err.into())
    }
}
