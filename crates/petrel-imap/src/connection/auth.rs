//! Authentication and capability negotiation.
//!
//! Ranks SASL mechanisms against the user preference and the
//! failed-method set, walks the greeting/STARTTLS/auth/post-auth
//! sequence, and installs the post-auth features in fixed order.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::config::AuthPreference;
use crate::host::HostRegistry;
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::quirks::{ServerQuirks, ServerType};
use crate::sink::{AlertKey, LoginRetry, SinkBundle};
use crate::types::{Capability, ResponseCode, Status};
use crate::{Error, Result};

use super::engine::CommandOutcome;
use super::{Connection, ConnectionState, ImapStream};

/// A SASL mechanism (or the legacy LOGIN command).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// AUTH=EXTERNAL (TLS client certificate).
    External,
    /// AUTH=GSSAPI (Kerberos).
    Gssapi,
    /// AUTH=CRAM-MD5.
    CramMd5,
    /// AUTH=NTLM.
    Ntlm,
    /// AUTH=MSN.
    Msn,
    /// AUTH=XOAUTH2.
    OAuth2,
    /// AUTH=PLAIN.
    Plain,
    /// AUTH=LOGIN (the SASL variant).
    SaslLogin,
    /// The legacy LOGIN command.
    OldLogin,
}

impl AuthMethod {
    /// All methods in fixed preference order.
    pub const ORDER: [Self; 9] = [
        Self::External,
        Self::Gssapi,
        Self::CramMd5,
        Self::Ntlm,
        Self::Msn,
        Self::OAuth2,
        Self::Plain,
        Self::SaslLogin,
        Self::OldLogin,
    ];

    const fn bit(self) -> u16 {
        match self {
            Self::External => 1 << 0,
            Self::Gssapi => 1 << 1,
            Self::CramMd5 => 1 << 2,
            Self::Ntlm => 1 << 3,
            Self::Msn => 1 << 4,
            Self::OAuth2 => 1 << 5,
            Self::Plain => 1 << 6,
            Self::SaslLogin => 1 << 7,
            Self::OldLogin => 1 << 8,
        }
    }

    /// The mechanism name on the wire.
    #[must_use]
    pub const fn mechanism(self) -> &'static str {
        match self {
            Self::External => "EXTERNAL",
            Self::Gssapi => "GSSAPI",
            Self::CramMd5 => "CRAM-MD5",
            Self::Ntlm => "NTLM",
            Self::Msn => "MSN",
            Self::OAuth2 => "XOAUTH2",
            Self::Plain => "PLAIN",
            Self::SaslLogin => "LOGIN",
            Self::OldLogin => "LOGIN-command",
        }
    }

    /// Returns true if the method needs a password.
    #[must_use]
    pub const fn needs_password(self) -> bool {
        matches!(
            self,
            Self::CramMd5 | Self::Ntlm | Self::Msn | Self::Plain | Self::SaslLogin | Self::OldLogin
        )
    }
}

/// Bitmask of failed (or excluded) methods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodSet(u16);

impl MethodSet {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Adds a method.
    pub const fn insert(&mut self, method: AuthMethod) {
        self.0 |= method.bit();
    }

    /// Membership test.
    #[must_use]
    pub const fn contains(self, method: AuthMethod) -> bool {
        self.0 & method.bit() != 0
    }

    /// Clears the set.
    pub const fn clear(&mut self) {
        self.0 = 0;
    }
}

/// Returns the methods the user preference admits.
const fn preferred_set(pref: AuthPreference) -> MethodSet {
    let mut set = MethodSet::empty();
    match pref {
        AuthPreference::Any => {
            let mut i = 0;
            while i < AuthMethod::ORDER.len() {
                set.insert(AuthMethod::ORDER[i]);
                i += 1;
            }
        }
        AuthPreference::PasswordCleartext => {
            set.insert(AuthMethod::Plain);
            set.insert(AuthMethod::SaslLogin);
            set.insert(AuthMethod::OldLogin);
        }
        AuthPreference::PasswordEncrypted => set.insert(AuthMethod::CramMd5),
        AuthPreference::Ntlm => {
            set.insert(AuthMethod::Ntlm);
            set.insert(AuthMethod::Msn);
        }
        AuthPreference::Gssapi => set.insert(AuthMethod::Gssapi),
        AuthPreference::External => set.insert(AuthMethod::External),
        AuthPreference::Secure => {
            set.insert(AuthMethod::External);
            set.insert(AuthMethod::Gssapi);
            set.insert(AuthMethod::CramMd5);
            set.insert(AuthMethod::Ntlm);
            set.insert(AuthMethod::Msn);
            set.insert(AuthMethod::OAuth2);
        }
        AuthPreference::OAuth2 => set.insert(AuthMethod::OAuth2),
        AuthPreference::None => {}
        AuthPreference::Old => set.insert(AuthMethod::OldLogin),
    }
    set
}

/// Picks the next method: capabilities ∧ preferred ∧ ¬failed, in fixed
/// order.
#[must_use]
pub fn choose_method(
    pref: AuthPreference,
    caps: &crate::types::CapabilitySet,
    failed: MethodSet,
) -> Option<AuthMethod> {
    let preferred = preferred_set(pref);
    AuthMethod::ORDER.into_iter().find(|&method| {
        if !preferred.contains(method) || failed.contains(method) {
            return false;
        }
        match method {
            AuthMethod::OldLogin => !caps.has(&Capability::LoginDisabled),
            m => caps.has_auth(m.mechanism()),
        }
    })
}

/// Runs the whole connection-establishment sequence: greeting, optional
/// STARTTLS, CLIENTID, the authentication loop, and post-auth features.
pub async fn establish_session(
    conn: &mut Connection<ImapStream>,
    sinks: &SinkBundle,
    registry: &HostRegistry,
) -> Result<()> {
    read_greeting(conn, sinks).await?;

    if conn.caps.is_empty() {
        // Capabilities were not piggybacked on the greeting.
        let _ = conn.run_command(&Command::Capability, sinks).await?.ok()?;
    }

    negotiate_starttls(conn, sinks).await?;

    conn.quirks = ServerQuirks::for_server(ServerType::detect(
        &conn.caps,
        conn.greeting_text.as_deref(),
    ));

    if conn.caps.has(&Capability::ClientId) && conn.state == ConnectionState::NotAuthenticated {
        let cmd = Command::ClientId {
            kind: "TOKEN".to_string(),
            value: conn.config.client_id_name.clone(),
        };
        // Advisory; a NO here is not fatal.
        let _ = conn.run_command(&cmd, sinks).await?;
    }

    authenticate(conn, sinks).await?;

    let deflate_pending = install_session_features(conn, sinks, registry, true).await?;
    if deflate_pending {
        conn.enable_deflate();
        info!("COMPRESS=DEFLATE active");
        install_remaining_features(conn, sinks, registry).await?;
    }

    registry.set_capabilities(&server_key(conn), &conn.caps);
    Ok(())
}

/// Session establishment for transports that cannot be upgraded in
/// place (already-secured tunnels and scripted tests): greeting,
/// capability, the authentication loop, and the post-auth features with
/// STARTTLS and COMPRESS left out.
pub async fn establish_plain<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    registry: &HostRegistry,
) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    read_greeting(conn, sinks).await?;

    if conn.caps.is_empty() {
        let _ = conn.run_command(&Command::Capability, sinks).await?.ok()?;
    }

    conn.quirks = ServerQuirks::for_server(ServerType::detect(
        &conn.caps,
        conn.greeting_text.as_deref(),
    ));

    authenticate(conn, sinks).await?;
    let _ = install_session_features(conn, sinks, registry, false).await?;
    registry.set_capabilities(&server_key(conn), &conn.caps);
    Ok(())
}

/// Reads and classifies the greeting.
pub(crate) async fn read_greeting<S>(conn: &mut Connection<S>, sinks: &SinkBundle) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let raw = conn.read_one().await?;
    match ResponseParser::parse(&raw)? {
        Response::Untagged(UntaggedResponse::Ok { code, text }) => {
            conn.greeting_text = Some(text);
            if let Some(ResponseCode::Capability(caps)) = code {
                conn.caps.replace(caps);
                sinks.server.set_capability(&conn.caps);
            }
            Ok(())
        }
        Response::Untagged(UntaggedResponse::PreAuth { code, text }) => {
            if conn.config.security.requires_starttls() {
                // PREAUTH skips the window where STARTTLS would run; with
                // TLS required this proves a MITM opportunity.
                sinks
                    .server
                    .fe_alert(AlertKey::PreAuthWithStartTlsRequired, Some(&text));
                return Err(Error::AuthFailed(
                    "server PREAUTH with STARTTLS required".to_string(),
                ));
            }
            conn.greeting_text = Some(text);
            if let Some(ResponseCode::Capability(caps)) = code {
                conn.caps.replace(caps);
                sinks.server.set_capability(&conn.caps);
            }
            conn.state = ConnectionState::Authenticated;
            Ok(())
        }
        Response::Untagged(UntaggedResponse::Bye { text, .. }) => Err(Error::Bye(text)),
        other => Err(Error::Protocol(format!("unexpected greeting: {other:?}"))),
    }
}

/// Performs STARTTLS per the configured policy.
async fn negotiate_starttls(
    conn: &mut Connection<ImapStream>,
    sinks: &SinkBundle,
) -> Result<()> {
    if !conn.config.security.wants_starttls() {
        return Ok(());
    }

    if !conn.caps.has(&Capability::StartTls) {
        if conn.config.security.requires_starttls() {
            sinks
                .server
                .fe_alert(AlertKey::StartTlsRequiredUnavailable, None);
            return Err(Error::AuthFailed(
                "STARTTLS required but not offered".to_string(),
            ));
        }
        return Ok(());
    }

    let outcome = conn.run_command(&Command::StartTls, sinks).await?;
    if !outcome.is_ok() {
        if conn.config.security.requires_starttls() {
            sinks
                .server
                .fe_alert(AlertKey::StartTlsRequiredUnavailable, Some(&outcome.text));
            return Err(Error::AuthFailed("STARTTLS refused".to_string()));
        }
        return Ok(());
    }

    conn.upgrade_starttls().await?;
    info!("STARTTLS handshake complete");

    // Capabilities change across the TLS boundary; ask again. STARTTLS
    // itself stays remembered by the capability set.
    let _ = conn.run_command(&Command::Capability, sinks).await?.ok()?;
    Ok(())
}

/// The authentication loop with mechanism fallback and the
/// retry/new-password prompt.
pub async fn authenticate<S>(conn: &mut Connection<S>, sinks: &SinkBundle) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if conn.state != ConnectionState::NotAuthenticated {
        return Ok(());
    }
    if matches!(conn.config.auth, AuthPreference::None) {
        return Err(Error::AuthFailed(
            "authentication required but preference is none".to_string(),
        ));
    }

    let username = sinks.server.login_username();
    let mut failed = MethodSet::empty();
    let mut password: Option<String> = None;
    let mut new_prompt = false;

    loop {
        conn.check_death()?;

        let Some(method) = choose_method(conn.config.auth, &conn.caps, failed) else {
            // Every admissible method failed: this is the wrong-password
            // path. Ask, serialized against other connections waking up
            // with the same stale credentials.
            let choice = sinks
                .server
                .run_logon_exclusive(&mut || sinks.server.prompt_login_failed());
            match choice {
                LoginRetry::Retry => {
                    failed.clear();
                    continue;
                }
                LoginRetry::NewPassword => {
                    sinks.server.forget_password();
                    password = None;
                    new_prompt = true;
                    failed.clear();
                    continue;
                }
                LoginRetry::Cancel => {
                    sinks.server.fe_alert(AlertKey::LoginFailed, None);
                    return Err(Error::AuthCancelled);
                }
            }
        };

        if method.needs_password() && password.is_none() {
            password = Some(obtain_password(sinks, new_prompt)?);
        }

        debug!(mechanism = method.mechanism(), "trying auth method");
        match run_method(conn, method, &username, password.as_deref(), sinks).await {
            Ok(()) => {
                conn.state = ConnectionState::Authenticated;
                return Ok(());
            }
            Err(Error::No { text, code }) => {
                if matches!(code, Some(ResponseCode::Unavailable)) {
                    // Provider throttling: stop immediately, surface the
                    // server's own text.
                    return Err(Error::AuthUnavailable(text));
                }
                warn!(mechanism = method.mechanism(), "auth method failed");
                failed.insert(method);
            }
            Err(Error::Bad(_)) | Err(Error::AuthMechNotSupported(_)) => {
                failed.insert(method);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Gets the password: the prompt first, the secret store as fallback.
fn obtain_password(sinks: &SinkBundle, new_prompt: bool) -> Result<String> {
    match sinks.server.async_get_password(new_prompt) {
        Ok(pw) => Ok(pw),
        Err(Error::AuthCancelled) => Err(Error::AuthCancelled),
        Err(_) => sinks.server.stored_password().ok_or(Error::NoPassword),
    }
}

/// Runs a single mechanism to completion.
async fn run_method<S>(
    conn: &mut Connection<S>,
    method: AuthMethod,
    username: &str,
    password: Option<&str>,
    sinks: &SinkBundle,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let password = password.unwrap_or("");
    match method {
        AuthMethod::External => {
            let initial = if username.is_empty() {
                "=".to_string()
            } else {
                BASE64.encode(username)
            };
            sasl_command(conn, "EXTERNAL", Some(initial), |_| Ok(String::new()), sinks)
                .await?
                .ok()
                .map(|_| ())
        }
        AuthMethod::Plain => {
            let initial = BASE64.encode(format!("\0{username}\0{password}"));
            sasl_command(conn, "PLAIN", Some(initial), |_| Ok(String::new()), sinks)
                .await?
                .ok()
                .map(|_| ())
        }
        AuthMethod::SaslLogin => {
            let mut step = 0u8;
            let user = BASE64.encode(username);
            let pass = BASE64.encode(password);
            sasl_command(
                conn,
                "LOGIN",
                None,
                move |_| {
                    step += 1;
                    Ok(if step == 1 { user.clone() } else { pass.clone() })
                },
                sinks,
            )
            .await?
            .ok()
            .map(|_| ())
        }
        AuthMethod::CramMd5 => {
            let server = std::sync::Arc::clone(&sinks.server);
            let password = password.to_string();
            let username = username.to_string();
            sasl_command(
                conn,
                "CRAM-MD5",
                None,
                move |challenge_b64| {
                    let challenge = BASE64
                        .decode(challenge_b64.trim())
                        .map_err(|_| Error::Protocol("bad CRAM-MD5 challenge".to_string()))?;
                    let digest = server.cram_md5_digest(&challenge, &password)?;
                    Ok(BASE64.encode(format!("{username} {digest}")))
                },
                sinks,
            )
            .await?
            .ok()
            .map(|_| ())
        }
        AuthMethod::OAuth2 => {
            let token = sinks.server.oauth2_token()?;
            let initial =
                BASE64.encode(format!("user={username}\x01auth=Bearer {token}\x01\x01"));
            sasl_command(conn, "XOAUTH2", Some(initial), |_| Ok(String::new()), sinks)
                .await?
                .ok()
                .map(|_| ())
        }
        AuthMethod::OldLogin => {
            let cmd = Command::Login {
                username: username.to_string(),
                password: password.to_string(),
            };
            conn.run_command(&cmd, sinks).await?.ok().map(|_| ())
        }
        AuthMethod::Gssapi | AuthMethod::Ntlm | AuthMethod::Msn => {
            // The primitive math for these lives outside the engine.
            Err(Error::AuthMechNotSupported(method.mechanism().to_string()))
        }
    }
}

/// Issues AUTHENTICATE and services continuations with `responder`.
async fn sasl_command<S, F>(
    conn: &mut Connection<S>,
    mechanism: &str,
    initial_response: Option<String>,
    mut responder: F,
    sinks: &SinkBundle,
) -> Result<CommandOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut(&str) -> Result<String>,
{
    let tag = conn.tags.next();
    debug!(tag = tag.as_str(), mechanism, "C: AUTHENTICATE <redacted>");

    let mut line = format!("{tag} AUTHENTICATE {mechanism}");
    if let Some(initial) = initial_response {
        line.push(' ');
        line.push_str(&initial);
    }
    conn.framed.write_line(line.as_bytes()).await?;

    let mut untagged = Vec::new();
    loop {
        let raw = conn.read_one().await?;
        match ResponseParser::parse(&raw)? {
            Response::Continuation { text } => {
                let reply = responder(text.as_deref().unwrap_or(""))?;
                conn.framed.write_line(reply.as_bytes()).await?;
            }
            Response::Tagged {
                tag: t,
                status,
                code,
                text,
            } if t == tag => {
                conn.apply_resp_code(code.as_ref());
                conn.last_command_ok = status == Status::Ok;
                return Ok(CommandOutcome {
                    status,
                    code,
                    text,
                    untagged,
                });
            }
            Response::Tagged { .. } | Response::Ignored => {}
            Response::Untagged(u) => {
                let u = conn.apply_untagged(u, sinks)?;
                untagged.push(u);
            }
        }
    }
}

/// Installs post-auth features in fixed order: ID, ENABLE CONDSTORE,
/// ENABLE UTF8=ACCEPT, COMPRESS=DEFLATE, NAMESPACE, LANGUAGE,
/// XSERVERINFO.
///
/// When COMPRESS DEFLATE is accepted (and `allow_compress` is set) this
/// returns `Ok(true)` immediately so the caller can swap the transport
/// before [`install_remaining_features`] continues. Otherwise the whole
/// sequence runs and `Ok(false)` comes back.
pub(crate) async fn install_session_features<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    registry: &HostRegistry,
    allow_compress: bool,
) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if conn.caps.has(&Capability::Id) {
        let cmd = Command::Id {
            parameters: Some(vec![
                ("name".to_string(), conn.config.client_id_name.clone()),
                ("version".to_string(), conn.config.client_id_version.clone()),
            ]),
        };
        let outcome = conn.run_command(&cmd, sinks).await?;
        for u in &outcome.untagged {
            if let UntaggedResponse::Id(pairs) = u {
                sinks.server.set_server_id(pairs);
            }
        }
    }

    if conn.caps.has(&Capability::Enable) && conn.caps.has(&Capability::CondStore) {
        let outcome = conn
            .run_command(
                &Command::Enable {
                    capabilities: vec!["CONDSTORE".to_string()],
                },
                sinks,
            )
            .await?;
        if outcome.is_ok() {
            conn.condstore_enabled = true;
        }
    }

    if conn.caps.has(&Capability::Enable) && conn.caps.has(&Capability::Utf8Accept) {
        let outcome = conn
            .run_command(
                &Command::Enable {
                    capabilities: vec!["UTF8=ACCEPT".to_string()],
                },
                sinks,
            )
            .await?;
        if outcome.is_ok() {
            conn.utf8_accept = true;
        }
    }

    if allow_compress && conn.caps.has(&Capability::CompressDeflate) {
        let outcome = conn.run_command(&Command::CompressDeflate, sinks).await?;
        if outcome.is_ok() {
            // The caller swaps the transport, then resumes.
            return Ok(true);
        }
    }

    install_remaining_features(conn, sinks, registry).await?;
    Ok(false)
}

/// The tail of the post-auth sequence: NAMESPACE, LANGUAGE, XSERVERINFO.
pub(crate) async fn install_remaining_features<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    registry: &HostRegistry,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = server_key(conn);

    if conn.caps.has(&Capability::Namespace) && !registry.namespaces_fetched(&key) {
        let outcome = conn.run_command(&Command::Namespace, sinks).await?;
        for u in &outcome.untagged {
            if let UntaggedResponse::Namespace {
                personal,
                other,
                public,
            } = u
            {
                registry.set_namespaces(&key, personal.clone(), other.clone(), public.clone());
            }
        }
    }

    if conn.caps.has(&Capability::Language) && !conn.config.accept_languages.is_empty() {
        let cmd = Command::Language {
            tags: conn.config.accept_languages.clone(),
        };
        let _ = conn.run_command(&cmd, sinks).await?;
    }

    if conn
        .caps
        .has(&Capability::Unknown("XSERVERINFO".to_string()))
    {
        let _ = conn.run_command(&Command::XServerInfo, sinks).await?;
    }

    Ok(())
}

/// The registry key for this connection's server.
#[must_use]
pub(crate) fn server_key<S>(conn: &Connection<S>) -> String {
    format!("{}:{}", conn.config.host, conn.config.port)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::CapabilitySet;

    fn caps(list: Vec<Capability>) -> CapabilitySet {
        let mut set = CapabilitySet::new();
        set.replace(list);
        set
    }

    #[test]
    fn fixed_order_ranking() {
        let set = caps(vec![
            Capability::Auth("PLAIN".to_string()),
            Capability::Auth("CRAM-MD5".to_string()),
            Capability::Auth("LOGIN".to_string()),
        ]);
        assert_eq!(
            choose_method(AuthPreference::Any, &set, MethodSet::empty()),
            Some(AuthMethod::CramMd5)
        );
    }

    #[test]
    fn failed_method_excluded() {
        let set = caps(vec![
            Capability::Auth("PLAIN".to_string()),
            Capability::Auth("CRAM-MD5".to_string()),
        ]);
        let mut failed = MethodSet::empty();
        failed.insert(AuthMethod::CramMd5);
        assert_eq!(
            choose_method(AuthPreference::Any, &set, failed),
            Some(AuthMethod::Plain)
        );
    }

    #[test]
    fn preference_filters() {
        let set = caps(vec![
            Capability::Auth("PLAIN".to_string()),
            Capability::Auth("XOAUTH2".to_string()),
        ]);
        assert_eq!(
            choose_method(AuthPreference::OAuth2, &set, MethodSet::empty()),
            Some(AuthMethod::OAuth2)
        );
        assert_eq!(
            choose_method(AuthPreference::PasswordEncrypted, &set, MethodSet::empty()),
            None
        );
    }

    #[test]
    fn old_login_blocked_by_logindisabled() {
        let set = caps(vec![Capability::LoginDisabled]);
        assert_eq!(
            choose_method(AuthPreference::Any, &set, MethodSet::empty()),
            None
        );

        let set = caps(vec![Capability::Imap4Rev1]);
        assert_eq!(
            choose_method(AuthPreference::Any, &set, MethodSet::empty()),
            Some(AuthMethod::OldLogin)
        );
    }

    #[test]
    fn method_set_ops() {
        let mut set = MethodSet::empty();
        assert!(!set.contains(AuthMethod::Plain));
        set.insert(AuthMethod::Plain);
        assert!(set.contains(AuthMethod::Plain));
        set.clear();
        assert!(!set.contains(AuthMethod::Plain));
    }
}
