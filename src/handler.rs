use std::collections::HashMap;
use std::sync::Arc;

use crate::request::Request;
use crate::responder::Responder;
use crate::Error;

/// Application logic bound to a command name.
///
/// A handler writes its reply into the responder and may flag the session for disconnection
/// through [`Request::session`]. The returned error decides what happens to the connection:
/// a [`crate::ClientError`] keeps it open, anything else closes it after the error reply.
pub trait Handler: Send + Sync + 'static {
    fn serve(&self, res: &mut Responder, req: &Request) -> Result<(), Error>;
}

impl<F> Handler for F
where
    F: Fn(&mut Responder, &Request) -> Result<(), Error> + Send + Sync + 'static,
{
    fn serve(&self, res: &mut Responder, req: &Request) -> Result<(), Error> {
        self(res, req)
    }
}

/// Handlers keyed by lower-cased command name.
#[derive(Clone, Default)]
pub(crate) struct CommandTable {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl CommandTable {
    pub(crate) fn insert(&mut self, name: &str, handler: Arc<dyn Handler>) {
        self.handlers.insert(name.to_lowercase(), handler);
    }

    /// Looks a request name up verbatim; the codec has already lower-cased it.
    pub(crate) fn get(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(name)
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(res: &mut Responder, _req: &Request) -> Result<(), Error> {
        res.write_simple("OK");
        Ok(())
    }

    #[test]
    fn names_are_case_folded() {
        let mut table = CommandTable::default();
        table.insert("PiNg", Arc::new(ok));

        assert!(table.get("ping").is_some());
        assert!(table.get("PING").is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn last_registration_wins() {
        let mut table = CommandTable::default();
        table.insert("cmd", Arc::new(ok));
        table.insert(
            "CMD",
            Arc::new(|res: &mut Responder, _: &Request| -> Result<(), Error> {
                res.write_int(2);
                Ok(())
            }),
        );
        assert_eq!(table.len(), 1);

        let mut res = Responder::new();
        let handler = table.get("cmd").unwrap();
        handler.serve(&mut res, &Request::new("cmd", vec![])).unwrap();
        assert_eq!(res.to_frame(), crate::frame::Frame::Integer(2));
    }
}
