//-
// Copyright (c) 2026, the pgpst-mailer authors
//
// This file is part of pgpst-mailer.
//
// pgpst-mailer is free software: you can redistribute it and/or modify it
// under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// pgpst-mailer is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with pgpst-mailer. If not, see <http://www.gnu.org/licenses/>.

use chrono::prelude::*;
use log::error;

use super::chain::{
    HandlerFuture, MailContext, MailHandler, Next, SessionInfo,
};
use super::codes::SmtpResponse;

/// Delivery-chain link which prepends a `Received:` trace header to the
/// message before the rest of the chain sees it.
pub struct AddReceivedHeader;

impl MailHandler for AddReceivedHeader {
    fn handle<'a>(
        &'a self,
        cx: &'a mut MailContext,
        next: Next<'a>,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            let line = received_line(&cx.session, Local::now().into());
            let Some(ref mut transaction) = cx.transaction else {
                error!(
                    "{} [BUG] Delivery chain run without MAIL",
                    cx.session.log_prefix
                );
                return Err(SmtpResponse::local_error());
            };

            let data = &mut transaction.envelope.data;
            data.splice(0..0, line.into_bytes());

            next.run(cx).await
        })
    }
}

fn received_line(session: &SessionInfo, now: DateTime<FixedOffset>) -> String {
    let mut line = format!(
        "Received: from {} [{}] by {} with {};",
        session.helo, session.peer, session.hostname, session.protocol,
    );

    if let Some(ref tls) = session.tls {
        let mut parts = tls.split(':');
        let version = parts.next().unwrap_or_default();
        let cipher = parts.next().unwrap_or_default();
        line.push_str(&format!("\r\n\t(version={version} cipher={cipher});"));
    }

    line.push_str("\r\n\t");
    line.push_str(&now.to_rfc2822());
    line.push_str("\r\n");
    line
}
