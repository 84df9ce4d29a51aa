// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Transfer one leg of an established call to a new destination without
//! consulting it first.
//!
//! The transfer itself is a single `call_transfer` MI call; everything after
//! that is driven by `E_CALL_TRANSFER` notifications for the original callid,
//! which walk the transfer through `start`, optional provisional states, and
//! finally `ok` or `failure`. On success the original dialog is ended.

use super::{CmdContext, CmdError, CmdParams, CommandHandler, require};
use crate::event::{EventFilter, Subscription};
use serde_json::{Value, json};
use std::sync::Arc;

pub(super) struct CallBlindTransfer;

#[async_trait::async_trait]
impl CommandHandler for CallBlindTransfer {
    async fn run(self: Box<Self>, ctx: Arc<CmdContext>, params: CmdParams) {
        let (callid, leg, destination) = match (
            require(&params, "callid"),
            require(&params, "leg"),
            require(&params, "destination"),
        ) {
            (Ok(callid), Ok(leg), Ok(destination)) => (callid, leg, destination),
            (Err(e), ..) | (_, Err(e), _) | (.., Err(e)) => return ctx.notify_error(e).await,
        };

        // Register for transfer events before asking for the transfer, so
        // none can slip past us.
        let filter = EventFilter::from([("callid".to_owned(), callid.to_owned())]);
        let Some(mut sub) = ctx.proxy().subscribe_filter("E_CALL_TRANSFER", filter).await else {
            return ctx.notify_error(CmdError::SubscribeFailed).await;
        };

        let reply = ctx
            .proxy()
            .mi_call_sync(
                "call_transfer",
                json!({ "callid": callid, "leg": leg, "destination": destination }),
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
        ctx.notify_event("Transferring", Some(json!({ "destination": destination })))
            .await;

        let mut destination = destination.to_owned();
        let outcome = watch_transfer(&ctx, &mut sub, callid, &mut destination).await;
        match outcome {
            Ok(()) => {
                // The transfer took; the original dialog is no longer needed.
                let _ = ctx
                    .proxy()
                    .mi_call("dlg_end_dlg", json!({ "dialog_id": callid }));
                sub.unsubscribe().await;
                ctx.notify_end().await;
            }
            Err(e) => {
                sub.unsubscribe().await;
                ctx.notify_error(e).await;
            }
        }
    }
}

/// Drive the notification state machine until the transfer concludes.
async fn watch_transfer(
    ctx: &CmdContext,
    sub: &mut Subscription,
    callid: &str,
    destination: &mut String,
) -> Result<(), CmdError> {
    loop {
        let Some(notify) = sub.next().await else {
            return Err(CmdError::Failed("transfer event stream closed".to_owned()));
        };
        let state = notify.string_value("state")?.to_owned();
        let status = notify.string_value("status")?.to_owned();
        let transfer_callid = notify.string_value("transfer_callid").ok().map(str::to_owned);
        let event_callid = transfer_callid.as_deref().unwrap_or(callid);

        match state.as_str() {
            "start" => {
                if let Ok(d) = notify.string_value("destination") {
                    *destination = d.to_owned();
                }
                ctx.notify_event(
                    "TransferStart",
                    Some(progress_params(event_callid, destination, &status)),
                )
                .await;
            }
            "failure" => {
                return Err(CmdError::Failed(format!(
                    "Transfer failed with status {status}"
                )));
            }
            "ok" => {
                ctx.notify_event(
                    "TransferSuccessful",
                    Some(json!({ "callid": event_callid, "destination": destination })),
                )
                .await;
                return Ok(());
            }
            _ => {
                ctx.notify_event(
                    "TransferPending",
                    Some(progress_params(event_callid, destination, &status)),
                )
                .await;
            }
        }
    }
}

pub(super) fn progress_params(callid: &str, destination: &str, status: &str) -> Value {
    let mut params = json!({ "callid": callid, "destination": destination });
    if !status.is_empty() {
        params["extra"] = Value::String(status.to_owned());
    }
    params
}
