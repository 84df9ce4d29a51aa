// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Place a call on hold, or resume it; the same state machine with the MI
//! command and event names flipped.
//!
//! The proxy re-INVITEs both legs one after the other. Each leg reports a
//! `start` and then an `ok` (or `failure`) on `E_CALL_HOLD`; the command ends
//! once both legs have completed.

use super::{CmdContext, CmdError, CmdParams, CommandHandler, require};
use serde_json::json;
use std::sync::Arc;

pub(super) struct CallHold {
    pub hold: bool,
}

#[async_trait::async_trait]
impl CommandHandler for CallHold {
    async fn run(self: Box<Self>, ctx: Arc<CmdContext>, params: CmdParams) {
        let callid = match require(&params, "callid") {
            Ok(callid) => callid,
            Err(e) => return ctx.notify_error(e).await,
        };

        let Some(mut sub) = ctx.proxy().subscribe("E_CALL_HOLD").await else {
            return ctx.notify_error(CmdError::SubscribeFailed).await;
        };

        let command = if self.hold { "call_hold" } else { "call_unhold" };
        let reply = ctx
            .proxy()
            .mi_call_sync(command, json!({ "callid": callid }))
            .await;
        let error = match reply {
            Err(e) => Some(CmdError::from(e)),
            Ok(response) => match response.error {
                Some(error) => Some(CmdError::from(error)),
                None => None,
            },
        };
        if let Some(error) = error {
            sub.unsubscribe().await;
            return ctx.notify_error(error).await;
        }
        ctx.notify_event(if self.hold { "CallHolding" } else { "CallUnholding" }, None)
            .await;

        let mut caller_done = false;
        let mut callee_done = false;
        let outcome = loop {
            let Some(notify) = sub.next().await else {
                break Err(CmdError::Failed("hold event stream closed".to_owned()));
            };
            let state = match notify.string_value("state") {
                Ok(state) => state.to_owned(),
                Err(e) => break Err(e.into()),
            };
            let leg = match notify.string_value("leg") {
                Ok(leg) => leg.to_owned(),
                Err(e) => break Err(e.into()),
            };

            match state.as_str() {
                "start" => {
                    let event = if self.hold {
                        "CallHoldStart"
                    } else {
                        "CallUnholdStart"
                    };
                    ctx.notify_event(event, Some(json!({ "leg": leg }))).await;
                }
                "ok" => {
                    if leg == "caller" {
                        caller_done = true;
                    } else {
                        callee_done = true;
                    }
                    let event = if self.hold {
                        "CallHoldSuccessful"
                    } else {
                        "CallUnholdSuccessful"
                    };
                    ctx.notify_event(event, Some(json!({ "leg": leg }))).await;
                    if caller_done && callee_done {
                        break Ok(());
                    }
                }
                "failure" => break Err(CmdError::Failed("Transfer failed".to_owned())),
                _ => {}
            }
        };

        sub.unsubscribe().await;
        match outcome {
            Ok(()) => ctx.notify_end().await,
            Err(e) => ctx.notify_error(e).await,
        }
    }
}
