use crate::handler::Handler;
use crate::request::Request;
use crate::responder::Responder;
use crate::Error;

/// Ask the server to close the connection. The connection is closed as soon as the `OK` reply
/// has been written.
///
/// Ref: <https://redis.io/docs/latest/commands/quit>
#[derive(Debug, Clone, Copy)]
pub struct Quit;

impl Handler for Quit {
    fn serve(&self, res: &mut Responder, req: &Request) -> Result<(), Error> {
        if let Some(session) = req.session() {
            session.set_quit();
        }
        res.write_simple("OK");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use std::sync::Arc;

    #[test]
    fn quit_sets_flag() {
        let session = Arc::new(Session::new("test".to_string(), None));
        let mut req = Request::new("quit", vec![]);
        req.attach(&session);

        let mut res = Responder::new();
        Quit.serve(&mut res, &req).unwrap();

        assert!(session.is_quit());
        assert!(!session.is_closed());
    }
}
