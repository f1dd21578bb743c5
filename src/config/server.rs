//! Firmware side of the configuration protocol.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::channel::{Endpoint, RxHandler};
use crate::config::{ConfigMsg, RequestKind, ResponseKind, VarStore};

/// Answers configuration requests from the OS side.
///
/// Purely reactive: every well-formed request gets exactly one response,
/// sent back on the channel it arrived on.  Register it as the
/// [`crate::config::CHANNEL_NAME`] channel's handler.
pub struct ConfigServer<S: VarStore> {
    store: S,
}

impl<S: VarStore> ConfigServer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Build the response to `req`, applying any write it asks for.
    pub fn handle_request(&self, req: &ConfigMsg) -> ConfigMsg {
        let seq = req.seq;
        let count = self.store.count();

        let respond = |kind, value| ConfigMsg::response(seq, kind, req.index, value);

        // Checked for everything but nop and count, even unknown requests
        let index = usize::try_from(req.index).ok().filter(|&index| index < count);

        match (req.request_kind(), index) {
            (Ok(RequestKind::Nop), _) => respond(ResponseKind::Ok, 0),
            (Ok(RequestKind::Count), _) => respond(ResponseKind::Count, count as i32),
            (_, None) => {
                debug!("Request {seq}: bad index {}", req.index);
                respond(ResponseKind::BadIndex, 0)
            }
            (Err(_), Some(_)) => {
                warn!("Request {seq}: unknown type {}", req.kind);
                respond(ResponseKind::BadRequest, 0)
            }
            (Ok(RequestKind::Write), Some(index)) => {
                let stored = self.store.write(index, req.value);
                trace!("Request {seq}: wrote {stored} to {}", self.store.name(index));
                respond(ResponseKind::Ok, 0)
            }
            (Ok(RequestKind::Read), Some(index)) => {
                respond(ResponseKind::Value, self.store.sample(index))
            }
            (Ok(RequestKind::Min), Some(index)) => respond(ResponseKind::Min, self.store.min(index)),
            (Ok(RequestKind::Max), Some(index)) => respond(ResponseKind::Max, self.store.max(index)),
            (Ok(RequestKind::Name), Some(index)) => {
                let mut rsp = respond(ResponseKind::Name, self.store.value(index));
                rsp.set_data(self.store.name(index).as_bytes());
                rsp
            }
            (Ok(RequestKind::Description), Some(index)) => {
                let mut rsp = respond(ResponseKind::Description, self.store.value(index));
                rsp.set_data(self.store.description(index).as_bytes());
                rsp
            }
        }
    }
}

impl<S: VarStore> RxHandler for ConfigServer<S> {
    fn on_message(&mut self, ep: &mut Endpoint<'_>, data: &[u8]) {
        let req = match ConfigMsg::decode(data) {
            Ok(req) => req,
            Err(_) => {
                warn!("Dropping {} byte config request, too short", data.len());
                return;
            }
        };

        let rsp = self.handle_request(&req);
        ep.send(&rsp.encode());
    }
}
