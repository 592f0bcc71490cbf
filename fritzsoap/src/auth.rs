//! HTTP authentication answering `WWW-Authenticate` challenges (Basic and Digest)
//!
//! TR-64 devices protect their control URLs with Digest authentication
//! (RFC 2617, MD5, `qop=auth`).

use md5::{Digest, Md5};

use crate::request::Credentials;

/// Parsed `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic,
    Digest(DigestChallenge),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    /// `MD5-sess` mixes the nonces into HA1.
    pub fn is_session(&self) -> bool {
        self.algorithm
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case("md5-sess"))
    }
}

/// Parses a `WWW-Authenticate` value; `None` for unsupported schemes and
/// Digest algorithms other than `MD5` and `MD5-sess`.
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, rest) = header.split_once(char::is_whitespace).unwrap_or((header, ""));

    if scheme.eq_ignore_ascii_case("basic") {
        return Some(Challenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("digest") {
        return None;
    }

    let mut realm = None;
    let mut nonce = None;
    let mut qop = None;
    let mut opaque = None;
    let mut algorithm = None;

    for (key, value) in split_params(rest) {
        match key.to_ascii_lowercase().as_str() {
            "realm" => realm = Some(value),
            "nonce" => nonce = Some(value),
            "qop" => qop = Some(value),
            "opaque" => opaque = Some(value),
            "algorithm" => algorithm = Some(value),
            _ => {}
        }
    }

    if let Some(algorithm) = &algorithm {
        if !algorithm.eq_ignore_ascii_case("md5") && !algorithm.eq_ignore_ascii_case("md5-sess") {
            return None;
        }
    }

    Some(Challenge::Digest(DigestChallenge {
        realm: realm.unwrap_or_default(),
        nonce: nonce?,
        qop,
        opaque,
        algorithm,
    }))
}

/// Splits `a="x, y", b=z` into pairs, honouring quotes.
fn split_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    let mut push = |raw: &str| {
        if let Some((k, v)) = raw.split_once('=') {
            let v = v.trim().trim_matches('"').to_string();
            params.push((k.trim().to_string(), v));
        }
    };

    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                push(&current);
                current.clear();
            }
            _ => current.push(c),
        }
    }
    push(&current);
    params
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Computes the `Authorization` header value for a Digest challenge.
pub fn digest_authorization(
    challenge: &DigestChallenge,
    credentials: &Credentials,
    method: &str,
    uri: &str,
    cnonce: &str,
    nonce_count: u32,
) -> String {
    let mut ha1 = md5_hex(&format!(
        "{}:{}:{}",
        credentials.username, challenge.realm, credentials.password
    ));
    if challenge.is_session() {
        ha1 = md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, cnonce));
    }
    let ha2 = md5_hex(&format!("{}:{}", method, uri));
    let nc = format!("{:08x}", nonce_count);

    // "auth" is the only protection level we implement; auth-int is ignored.
    let qop = challenge
        .qop
        .as_deref()
        .and_then(|q| q.split(',').map(str::trim).find(|q| *q == "auth"));

    let response = match qop {
        Some(qop) => md5_hex(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, challenge.nonce, nc, cnonce, qop, ha2
        )),
        None => md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2)),
    };

    let mut header = format!(
        r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", response="{}""#,
        credentials.username, challenge.realm, challenge.nonce, uri, response
    );
    if let Some(qop) = qop {
        header.push_str(&format!(r#", qop={}, nc={}, cnonce="{}""#, qop, nc, cnonce));
    }
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(r#", opaque="{}""#, opaque));
    }
    if let Some(algorithm) = &challenge.algorithm {
        header.push_str(&format!(", algorithm={}", algorithm));
    }
    header
}

/// Fresh client nonce.
pub fn new_cnonce() -> String {
    format!("{:016x}", rand::random::<u64>())
}
