// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Click-to-dial: call the caller, then transfer that call to the callee.
//!
//! An INVITE with a throwaway SDP offer is sent to the caller via `t_uac_dlg`
//! with the command id as its Call-Id, so transfer events for the new dialog
//! can be matched on it. Once the caller answers, the single established leg
//! is blind-transferred to the callee; when the transfer completes the
//! original dialog is closed with a BYE built from the headers echoed in the
//! INVITE reply.

use super::call_blind_transfer::progress_params;
use super::{CmdContext, CmdError, CmdParams, CommandHandler, require};
use crate::event::{EventFilter, Subscription};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// Grace time between the caller answering and the transfer towards the
// callee, so the freshly established dialog has settled proxy-side.
const TRANSFER_QUIESCENCE: Duration = Duration::from_millis(500);

const SDP_OFFER: &str = "v=0\r\n\
    o=click-to-dial 0 0 IN IP4 0.0.0.0\r\n\
    s=session\r\n\
    c=IN IP4 0.0.0.0\r\n\
    t=0 0\r\n\
    m=audio 9 RTP/AVP 0\r\n\
    a=rtpmap:0 PCMU/8000\r\n";

pub(super) struct CallStart;

#[async_trait::async_trait]
impl CommandHandler for CallStart {
    async fn run(self: Box<Self>, ctx: Arc<CmdContext>, params: CmdParams) {
        let (caller, callee) = match (require(&params, "caller"), require(&params, "callee")) {
            (Ok(caller), Ok(callee)) => (caller, callee),
            (Err(e), _) | (_, Err(e)) => return ctx.notify_error(e).await,
        };

        let headers = format!(
            "From: <{caller}>\r\n\
             To: <{callee}>\r\n\
             Contact: <{caller}>\r\n\
             Content-Type: application/sdp\r\n\
             CSeq: 1 INVITE\r\n\
             Call-Id: {}\r\n",
            ctx.id(),
        );
        let mut invite = json!({
            "method": "INVITE",
            "ruri": caller,
            "headers": headers,
            "body": SDP_OFFER,
        });
        if let Some(uri) = ctx.proxy().uri() {
            invite["next_hop"] = uri.into();
        }

        let reply = match ctx.proxy().mi_call_sync("t_uac_dlg", invite).await {
            Ok(reply) => reply,
            Err(e) => return ctx.notify_error(e).await,
        };
        if let Some(error) = &reply.error {
            return ctx.notify_error(error.clone()).await;
        }
        let status = match reply.string_value("Status") {
            Ok(status) => status,
            Err(e) => return ctx.notify_error(e).await,
        };
        if !status.starts_with("200") {
            return ctx
                .notify_error(CmdError::Failed(format!(
                    "failed to establish initial call: {status}"
                )))
                .await;
        }
        let ruri = match reply.string_value("RURI") {
            Ok(ruri) => ruri.to_owned(),
            Err(e) => return ctx.notify_error(e).await,
        };
        let message = match reply.string_value("Message") {
            Ok(message) => message,
            Err(e) => return ctx.notify_error(e).await,
        };
        // Keep the headers identifying the new dialog verbatim; the closing
        // BYE must present them unchanged.
        let mut dlginfo = String::new();
        for header in message.split("\r\n") {
            if let Some("From" | "To" | "Routes" | "Call-ID" | "Call-Id") = header.split(':').next()
            {
                dlginfo.push_str(header);
                dlginfo.push_str("\r\n");
            }
        }
        ctx.notify_event(
            "CallerAnswered",
            Some(json!({ "caller": caller, "callee": callee })),
        )
        .await;

        // Register for transfer events before asking for the transfer.
        let filter = EventFilter::from([("callid".to_owned(), ctx.id().to_owned())]);
        let Some(mut sub) = ctx.proxy().subscribe_filter("E_CALL_TRANSFER", filter).await else {
            return ctx.notify_error(CmdError::SubscribeFailed).await;
        };

        tokio::time::sleep(TRANSFER_QUIESCENCE).await;

        let reply = ctx
            .proxy()
            .mi_call_sync(
                "call_transfer",
                json!({ "callid": ctx.id(), "leg": "callee", "destination": callee }),
            )
            .await;
        match reply {
            Err(e) => {
                sub.unsubscribe().await;
                return ctx.notify_error(e).await;
            }
            Ok(response) => {
                if let Some(error) = response.error {
                    // The caller answered but cannot be bridged; hang their
                    // leg up before reporting.
                    send_bye(&ctx, &ruri, &dlginfo);
                    sub.unsubscribe().await;
                    return ctx.notify_error(error).await;
                }
            }
        }
        ctx.notify_event(
            "Transferring",
            Some(json!({ "caller": caller, "destination": callee })),
        )
        .await;

        let outcome = watch_transfer(&ctx, &mut sub, caller, callee).await;
        match outcome {
            Ok(()) => {
                send_bye(&ctx, &ruri, &dlginfo);
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

async fn watch_transfer(
    ctx: &CmdContext,
    sub: &mut Subscription,
    caller: &str,
    callee: &str,
) -> Result<(), CmdError> {
    let mut destination = callee.to_owned();
    loop {
        let Some(notify) = sub.next().await else {
            return Err(CmdError::Failed("transfer event stream closed".to_owned()));
        };
        let state = notify.string_value("state")?.to_owned();
        let status = notify.string_value("status")?.to_owned();
        let transfer_callid = notify.string_value("transfer_callid").ok().map(str::to_owned);
        let event_callid = transfer_callid.as_deref().unwrap_or_else(|| ctx.id());

        match state.as_str() {
            "start" => {
                if let Ok(d) = notify.string_value("destination") {
                    destination = d.to_owned();
                }
                ctx.notify_event(
                    "TransferStart",
                    Some(progress_params(event_callid, &destination, &status)),
                )
                .await;
            }
            "failure" => {
                return Err(CmdError::Failed(format!(
                    "transfer failed with status {status}"
                )));
            }
            "ok" => {
                ctx.notify_event(
                    "CalleeAnswered",
                    Some(json!({ "callid": event_callid, "caller": caller, "callee": callee })),
                )
                .await;
                return Ok(());
            }
            _ => {
                ctx.notify_event(
                    "TransferPending",
                    Some(progress_params(event_callid, &destination, &status)),
                )
                .await;
            }
        }
    }
}

fn send_bye(ctx: &CmdContext, ruri: &str, dlginfo: &str) {
    // The CSeq for the BYE is a guess; a UAS strictly tracking CSeq may
    // reject it.
    let params = json!({
        "method": "BYE",
        "ruri": ruri,
        "headers": format!("{dlginfo}CSeq: 3 BYE\r\n"),
    });
    let _ = ctx.proxy().mi_call("t_uac_dlg", params);
}
