// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Transfer a call after a consultation: bridge leg A of one dialog to leg B
//! of another.
//!
//! Progress arrives as `E_CALL_TRANSFER` notifications for callid A. A
//! provisional state carrying a 2xx status means the proxy has answered the
//! replacement call and the original dialog must be torn down early; the
//! `ended` flag makes sure that happens exactly once regardless of which
//! state reports it first.

use super::{CmdContext, CmdError, CmdParams, CommandHandler, require};
use crate::event::EventFilter;
use serde_json::{Value, json};
use std::sync::Arc;

pub(super) struct CallAttendedTransfer;

#[async_trait::async_trait]
impl CommandHandler for CallAttendedTransfer {
    async fn run(self: Box<Self>, ctx: Arc<CmdContext>, params: CmdParams) {
        let required = (
            require(&params, "callidA"),
            require(&params, "legA"),
            require(&params, "callidB"),
            require(&params, "legB"),
        );
        let (callid_a, leg_a, callid_b, leg_b) = match required {
            (Ok(a), Ok(la), Ok(b), Ok(lb)) => (a, la, b, lb),
            (Err(e), ..) | (_, Err(e), ..) | (_, _, Err(e), _) | (.., Err(e)) => {
                return ctx.notify_error(e).await;
            }
        };

        let filter = EventFilter::from([("callid".to_owned(), callid_a.to_owned())]);
        let Some(mut sub) = ctx.proxy().subscribe_filter("E_CALL_TRANSFER", filter).await else {
            return ctx.notify_error(CmdError::SubscribeFailed).await;
        };

        let reply = ctx
            .proxy()
            .mi_call_sync(
                "call_transfer",
                json!({
                    "callid": callid_a,
                    "leg": leg_a,
                    "transfer_callid": callid_b,
                    "transfer_leg": leg_b,
                }),
            )
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
        ctx.notify_event("Transferring", None).await;

        let mut ended = false;
        let mut destination: Option<String> = None;
        let outcome = loop {
            let Some(notify) = sub.next().await else {
                break Err(CmdError::Failed("transfer event stream closed".to_owned()));
            };
            let state = match notify.string_value("state") {
                Ok(state) => state.to_owned(),
                Err(e) => break Err(e.into()),
            };
            let status = match notify.string_value("status") {
                Ok(status) => status.to_owned(),
                Err(e) => break Err(e.into()),
            };
            let transfer_callid = notify.string_value("transfer_callid").ok().map(str::to_owned);
            let event_callid = transfer_callid.as_deref().unwrap_or(callid_a);

            match state.as_str() {
                "start" => {
                    if let Ok(d) = notify.string_value("destination") {
                        destination = Some(d.to_owned());
                    }
                    ctx.notify_event(
                        "TransferStart",
                        Some(json!({ "callid": event_callid, "destination": destination })),
                    )
                    .await;
                }
                "failure" => {
                    break Err(CmdError::Failed(format!(
                        "transfer failed with status {status}"
                    )));
                }
                "ok" => {
                    if !ended {
                        let _ = ctx
                            .proxy()
                            .mi_call("dlg_end_dlg", json!({ "dialog_id": callid_a }));
                        ended = true;
                    }
                    ctx.notify_event("TransferSuccessful", Some(json!({ "callid": event_callid })))
                        .await;
                    break Ok(());
                }
                _ => {
                    // A provisional carrying a SIP status; 2xx means the
                    // replacement call is answered and the original dialog
                    // can go.
                    if status.starts_with('2') && !ended {
                        let _ = ctx
                            .proxy()
                            .mi_call("dlg_end_dlg", json!({ "dialog_id": callid_a }));
                        ended = true;
                    }
                    let mut params = json!({ "callid": event_callid });
                    if let Some(destination) = &destination {
                        params["destination"] = Value::String(destination.clone());
                    }
                    if !status.is_empty() {
                        params["extra"] = Value::String(status.clone());
                    }
                    ctx.notify_event("TransferPending", Some(params)).await;
                }
            }
        };

        sub.unsubscribe().await;
        match outcome {
            Ok(()) => ctx.notify_end().await,
            Err(e) => ctx.notify_error(e).await,
        }
    }
}
