use std::str;
use std::sync::{Arc, Weak};

use bytes::Bytes;

use crate::error::ClientError;
use crate::session::Session;

/// One decoded command invocation.
///
/// The name is always lower case: the codec folds it the same way [`crate::Server::handle`]
/// folds registered names, so lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct Request {
    name: String,
    args: Vec<Bytes>,
    session: Option<Weak<Session>>,
}

impl Request {
    pub fn new(name: impl AsRef<str>, args: Vec<Bytes>) -> Self {
        Self {
            name: name.as_ref().to_lowercase(),
            args,
            session: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&Bytes> {
        self.args.get(index)
    }

    /// Returns the argument at `index` as UTF-8.
    pub fn arg_str(&self, index: usize) -> Result<&str, ClientError> {
        let arg = self.required(index)?;
        str::from_utf8(arg).map_err(|_| self.invalid(arg))
    }

    pub fn arg_int(&self, index: usize) -> Result<i64, ClientError> {
        let arg = self.required(index)?;
        str::from_utf8(arg)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| self.invalid(arg))
    }

    /// Fails with a wrong-arity error unless the argument count is within `min..=max`.
    pub fn expect_args(&self, min: usize, max: usize) -> Result<(), ClientError> {
        if self.args.len() < min || self.args.len() > max {
            return Err(ClientError::WrongNumberOfArguments(self.name.clone()));
        }
        Ok(())
    }

    /// The session this request arrived on. `None` for requests dispatched without a
    /// connection, or once the session has been dropped.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn attach(&mut self, session: &Arc<Session>) {
        self.session = Some(Arc::downgrade(session));
    }

    fn required(&self, index: usize) -> Result<&Bytes, ClientError> {
        self.args
            .get(index)
            .ok_or_else(|| ClientError::WrongNumberOfArguments(self.name.clone()))
    }

    fn invalid(&self, arg: &Bytes) -> ClientError {
        ClientError::InvalidArgument {
            command: self.name.clone(),
            argument: String::from_utf8_lossy(arg).into_owned(),
        }
    }
}
