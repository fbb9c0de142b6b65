use std::time::Duration;

use crate::error::{Error, Result};

/// A fully buffered HTTP exchange result.
///
/// Non-2xx responses are captured the same as successes: the protocol layer
/// discriminates on the status code and needs the problem body and the
/// `Replay-Nonce` header either way.
#[derive(Debug, Default)]
pub(crate) struct RawResponse {
    pub status: u16,
    /// Header names lowercased at capture time.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

pub(crate) fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(30))
        .timeout_read(Duration::from_secs(30))
        .timeout_write(Duration::from_secs(30))
        .build()
}

pub(crate) fn get(agent: &ureq::Agent, url: &str) -> Result<RawResponse> {
    let req = agent.get(url);
    log::trace!("{req:?}");
    unpack(req.call())
}

pub(crate) fn post_jose(agent: &ureq::Agent, url: &str, body: &str) -> Result<RawResponse> {
    let req = agent
        .post(url)
        .set("content-type", "application/jose+json");
    log::trace!("{req:?} {body}");
    unpack(req.send_string(body))
}

fn unpack(result: std::result::Result<ureq::Response, ureq::Error>) -> Result<RawResponse> {
    match result {
        Ok(res) => Ok(read(res)),
        Err(ureq::Error::Status(_, res)) => Ok(read(res)),
        Err(ureq::Error::Transport(transport)) => Err(Error::Transport(Box::new(transport))),
    }
}

fn read(res: ureq::Response) -> RawResponse {
    let status = res.status();

    let headers = res
        .headers_names()
        .into_iter()
        .filter_map(|name| {
            res.header(&name)
                .map(|value| (name.to_ascii_lowercase(), value.to_owned()))
        })
        .collect();

    let mut body = String::new();
    {
        use std::io::Read as _;
        // Let's Encrypt sometimes closes the TLS connection abruptly even
        // though the body made it across; keep what we got.
        res.into_reader().read_to_string(&mut body).ok();
    }

    RawResponse {
        status,
        headers,
        body,
    }
}
