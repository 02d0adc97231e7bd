//! The command engine: serialize, transmit (with literal framing), and
//! drive the parser until the matching tagged response.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::command::{Command, CommandChunk};
use crate::parser::{FetchRecord, Response, ResponseParser, UntaggedResponse};
use crate::sink::SinkBundle;
use crate::types::{Capability, ModSeq, PermanentFlags, ResponseCode, Status, Tag, UidSet};
use crate::{Error, Result};

use super::Connection;

/// Completion of one command: the tagged line plus everything untagged
/// that arrived while it ran.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Tagged status.
    pub status: Status,
    /// Response code from the tagged line.
    pub code: Option<ResponseCode>,
    /// Free text from the tagged line.
    pub text: String,
    /// Untagged responses, in arrival order.
    pub untagged: Vec<UntaggedResponse>,
}

impl CommandOutcome {
    /// Converts a NO/BAD completion into an error.
    pub fn ok(self) -> Result<Self> {
        match self.status {
            Status::Ok | Status::PreAuth => Ok(self),
            Status::No => Err(Error::No {
                text: self.text,
                code: self.code,
            }),
            Status::Bad => Err(Error::Bad(self.text)),
            Status::Bye => Err(Error::Bye(self.text)),
        }
    }

    /// True when the command completed OK.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// The COPYUID destination set, if the tagged line carried one.
    #[must_use]
    pub fn copyuid_dest(&self) -> Option<&UidSet> {
        match &self.code {
            Some(ResponseCode::CopyUid { dest, .. }) => Some(dest),
            _ => None,
        }
    }

    /// All FETCH records from the untagged stream.
    pub fn fetch_records(&self) -> impl Iterator<Item = &FetchRecord> {
        self.untagged.iter().filter_map(|u| match u {
            UntaggedResponse::Fetch(record) => Some(record),
            _ => None,
        })
    }

    /// Collected SEARCH result numbers.
    #[must_use]
    pub fn search_results(&self) -> Vec<u32> {
        let mut out = Vec::new();
        for u in &self.untagged {
            if let UntaggedResponse::Search(nums) = u {
                out.extend_from_slice(nums);
            }
        }
        out
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Runs one command to its tagged completion.
    ///
    /// The one-command-outstanding invariant is enforced with a debug
    /// assertion; the public ops layer is strictly sequential.
    pub(crate) async fn run_command(
        &mut self,
        cmd: &Command,
        sinks: &SinkBundle,
    ) -> Result<CommandOutcome> {
        debug_assert!(!self.outstanding, "command already outstanding");
        self.outstanding = true;
        let result = self.run_command_inner(cmd, sinks).await;
        self.outstanding = false;
        self.last_command_ok = matches!(&result, Ok(o) if o.is_ok());
        result
    }

    async fn run_command_inner(
        &mut self,
        cmd: &Command,
        sinks: &SinkBundle,
    ) -> Result<CommandOutcome> {
        let tag = self.tags.next();

        if cmd.is_auth_sensitive() {
            debug!(tag = tag.as_str(), command = cmd.name(), "C: <redacted>");
        } else {
            debug!(tag = tag.as_str(), command = cmd.name(), "C:");
        }

        let chunks = cmd.chunks(tag.as_str(), self.utf8_accept);
        let literal_plus =
            self.config.use_literal_plus && self.caps.has(&Capability::LiteralPlus);

        let mut untagged = Vec::new();

        let mut pending: Vec<u8> = Vec::new();
        for chunk in chunks {
            match chunk {
                CommandChunk::Text(text) => pending.extend_from_slice(&text),
                CommandChunk::Literal(data) => {
                    let marker = if literal_plus {
                        format!("{{{}+}}", data.len())
                    } else {
                        format!("{{{}}}", data.len())
                    };
                    pending.extend_from_slice(marker.as_bytes());
                    self.framed.write_line(&pending).await?;
                    pending.clear();

                    if !literal_plus {
                        // Synchronizing literal: the server must invite
                        // the payload with a continuation.
                        if let Some(outcome) =
                            self.wait_for_continuation(&tag, &mut untagged, sinks).await?
                        {
                            return Ok(outcome);
                        }
                    }
                    self.framed.write_raw(&data).await?;
                }
            }
        }
        self.framed.write_line(&pending).await?;

        self.drive_until_tagged(&tag, untagged, sinks).await
    }

    /// Waits for a `+` continuation before a synchronizing literal.
    ///
    /// Returns `Some(outcome)` if the server answered with the tagged
    /// completion instead (it refused the literal).
    async fn wait_for_continuation(
        &mut self,
        tag: &Tag,
        untagged: &mut Vec<UntaggedResponse>,
        sinks: &SinkBundle,
    ) -> Result<Option<CommandOutcome>> {
        loop {
            let raw = self.read_one().await?;
            match ResponseParser::parse(&raw)? {
                Response::Continuation { .. } => return Ok(None),
                Response::Tagged {
                    tag: t,
                    status,
                    code,
                    text,
                } if &t == tag => {
                    self.apply_resp_code(code.as_ref());
                    return Ok(Some(CommandOutcome {
                        status,
                        code,
                        text,
                        untagged: std::mem::take(untagged),
                    }));
                }
                Response::Tagged { .. } | Response::Ignored => {}
                Response::Untagged(u) => {
                    let u = self.apply_untagged(u, sinks)?;
                    untagged.push(u);
                }
            }
        }
    }

    /// Pulls responses until the matching tagged response arrives,
    /// routing untagged events to the state updaters.
    pub(crate) async fn drive_until_tagged(
        &mut self,
        tag: &Tag,
        mut untagged: Vec<UntaggedResponse>,
        sinks: &SinkBundle,
    ) -> Result<CommandOutcome> {
        loop {
            let raw = self.read_one().await?;
            match ResponseParser::parse(&raw)? {
                Response::Tagged {
                    tag: t,
                    status,
                    code,
                    text,
                } => {
                    if &t == tag {
                        self.apply_resp_code(code.as_ref());
                        debug!(tag = t.as_str(), ?status, "S: tagged completion");
                        return Ok(CommandOutcome {
                            status,
                            code,
                            text,
                            untagged,
                        });
                    }
                    // A completion for a tag we no longer track; accept.
                    warn!(tag = t.as_str(), "stale tagged response");
                }
                Response::Untagged(u) => {
                    let u = self.apply_untagged(u, sinks)?;
                    untagged.push(u);
                }
                Response::Continuation { .. } => {
                    // Not expecting client data here; accept silently.
                }
                Response::Ignored => {}
            }
        }
    }

    /// Reads one complete response under the current I/O timeout.
    pub(crate) async fn read_one(&mut self) -> Result<Vec<u8>> {
        match tokio::time::timeout(self.io_timeout, self.framed.read_response()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.io_timeout)),
        }
    }

    /// Applies an untagged response to the connection state and forwards
    /// the relevant events to the sinks. BYE is fatal.
    pub(crate) fn apply_untagged(
        &mut self,
        response: UntaggedResponse,
        sinks: &SinkBundle,
    ) -> Result<UntaggedResponse> {
        match &response {
            UntaggedResponse::Bye { text, .. } => {
                // Surface the server's parting text once.
                if self.last_alert.as_deref() != Some(text.as_str()) {
                    self.last_alert = Some(text.clone());
                    sinks
                        .server
                        .fe_alert(crate::sink::AlertKey::ServerDisconnected, Some(text));
                }
                return Err(Error::Bye(text.clone()));
            }
            UntaggedResponse::Capability(caps) => {
                self.caps.replace(caps.clone());
                sinks.server.set_capability(&self.caps);
            }
            UntaggedResponse::Enabled(caps) => {
                if caps.contains(&Capability::CondStore) {
                    self.condstore_enabled = true;
                }
                if caps.contains(&Capability::Utf8Accept) {
                    self.utf8_accept = true;
                }
            }
            UntaggedResponse::Exists(n) => {
                if let Some(selected) = &mut self.selected {
                    selected.exists = *n;
                }
            }
            UntaggedResponse::Recent(n) => {
                if let Some(selected) = &mut self.selected {
                    selected.recent = *n;
                }
            }
            UntaggedResponse::Flags(flags) => {
                self.flag_state.supported_flags = flags.clone();
                if let Some(selected) = &mut self.selected {
                    selected.supported_flags = flags.clone();
                }
            }
            UntaggedResponse::Expunge(seq) => {
                self.flag_state.expunge(seq.get());
                if let Some(selected) = &mut self.selected {
                    selected.exists = selected.exists.saturating_sub(1);
                }
            }
            UntaggedResponse::Fetch(record) => {
                // Records without a UID are discarded from state.
                if let Some(uid) = record.uid {
                    if let Some(flags) = &record.flags {
                        self.flag_state.record(record.seq, uid.get(), flags.clone());
                        sinks.notify_flag_record(record);
                    }
                    if let (Some(selected), Some(modseq)) = (&mut self.selected, record.modseq)
                        && selected.highest_mod_seq.is_none_or(|h| h < modseq)
                    {
                        selected.highest_mod_seq = Some(modseq);
                    }
                }
            }
            UntaggedResponse::Vanished { uids, .. } => {
                for uid in uids.iter() {
                    if let Some((_, index)) = self.flag_state.lookup_uid(uid) {
                        self.flag_state
                            .expunge(u32::try_from(index).unwrap_or(u32::MAX) + 1);
                    }
                }
                if let Some(folder) = self.selected_folder() {
                    sinks.message.notify_message_deleted(folder, false, Some(uids));
                }
            }
            UntaggedResponse::Ok { code, text } => {
                if matches!(code, Some(ResponseCode::Alert)) {
                    sinks
                        .server
                        .fe_alert(crate::sink::AlertKey::ServerDisconnected, Some(text));
                }
                self.apply_resp_code(code.as_ref());
            }
            UntaggedResponse::No { code, .. } | UntaggedResponse::Bad { code, .. } => {
                self.apply_resp_code(code.as_ref());
            }
            _ => {}
        }
        Ok(response)
    }

    /// Applies a response code to the selected-mailbox snapshot and the
    /// capability set.
    pub(crate) fn apply_resp_code(&mut self, code: Option<&ResponseCode>) {
        let Some(code) = code else { return };
        match code {
            ResponseCode::Capability(caps) => {
                self.caps.replace(caps.clone());
            }
            ResponseCode::UidValidity(v) => {
                if let Some(selected) = &mut self.selected {
                    selected.uid_validity = Some(*v);
                }
            }
            ResponseCode::UidNext(n) => {
                if let Some(selected) = &mut self.selected {
                    selected.uid_next = Some(*n);
                }
            }
            ResponseCode::Unseen(n) => {
                if let Some(selected) = &mut self.selected {
                    selected.unseen = Some(*n);
                }
            }
            ResponseCode::HighestModSeq(n) => {
                if let Some(selected) = &mut self.selected {
                    selected.highest_mod_seq = ModSeq::from_u64(*n);
                }
            }
            ResponseCode::NoModSeq => {
                if let Some(selected) = &mut self.selected {
                    selected.highest_mod_seq = None;
                }
            }
            ResponseCode::PermanentFlags(atoms) => {
                let permanent = PermanentFlags::from_reported(atoms);
                self.flag_state.permanent_flags = permanent.clone();
                if let Some(selected) = &mut self.selected {
                    selected.permanent_flags = permanent;
                }
            }
            ResponseCode::ReadOnly => {
                if let Some(selected) = &mut self.selected {
                    selected.folder_selected = false;
                }
            }
            ResponseCode::ReadWrite => {
                if let Some(selected) = &mut self.selected {
                    selected.folder_selected = true;
                }
            }
            _ => {}
        }
    }
}
