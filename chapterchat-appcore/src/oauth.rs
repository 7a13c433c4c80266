use chapterchat_core::types::Credential;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    #[error("not a valid URL: {0}")]
    Url(String),

    #[error("sign-in was rejected: {0}")]
    Denied(String),

    #[error("missing `{0}` in callback")]
    Missing(&'static str),
}

/// Reads the credential out of the redirect the identity provider lands on.
///
/// Expects `token` and `userId` query parameters; `provider` is optional and
/// an `error` parameter means the user did not complete sign-in.
pub fn parse_callback(callback_url: &str) -> Result<Credential, CallbackError> {
    let url = url::Url::parse(callback_url).map_err(|e| CallbackError::Url(e.to_string()))?;

    let mut token = None;
    let mut user_id = None;
    let mut provider = None;
    for (k, v) in url.query_pairs() {
        let v = v.trim().to_string();
        match k.as_ref() {
            "token" if !v.is_empty() => token = Some(v),
            "userId" | "user_id" if !v.is_empty() => user_id = Some(v),
            "provider" if !v.is_empty() => provider = Some(v),
            "error" => return Err(CallbackError::Denied(v)),
            _ => {}
        }
    }

    let token = token.ok_or(CallbackError::Missing("token"))?;
    let user_id = user_id.ok_or(CallbackError::Missing("userId"))?;
    let credential = Credential::new(token, user_id);
    Ok(match provider {
        Some(p) => credential.with_provider(p),
        None => credential,
    })
}
