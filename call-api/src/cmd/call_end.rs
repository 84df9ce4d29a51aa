// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Terminate an established call by ending its dialog on the proxy.

use super::{CmdContext, CmdParams, CommandHandler, require};
use serde_json::json;
use std::sync::Arc;

pub(super) struct CallEnd;

#[async_trait::async_trait]
impl CommandHandler for CallEnd {
    async fn run(self: Box<Self>, ctx: Arc<CmdContext>, params: CmdParams) {
        let callid = match require(&params, "callid") {
            Ok(callid) => callid,
            Err(e) => return ctx.notify_error(e).await,
        };

        let reply = ctx
            .proxy()
            .mi_call_sync("dlg_end_dlg", json!({ "dialog_id": callid }))
            .await;
        match reply {
            Err(e) => ctx.notify_error(e).await,
            Ok(response) => match response.error {
                Some(error) => ctx.notify_error(error).await,
                None => ctx.notify_end().await,
            },
        }
    }
}
