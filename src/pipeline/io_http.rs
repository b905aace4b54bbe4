use crate::pipeline::*;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::thread;
use std::time::{Duration, Instant};
use url::Url;

/// Fetches the body of a URL.
///
/// The only seam to the network: every stage that downloads goes through it.
pub trait Transport {
    fn get(&self, url: &Url) -> PipelineResult<Vec<u8>>;
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> PipelineResult<HttpTransport> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context(HttpSnafu { url: "<client>" })?;
        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &Url) -> PipelineResult<Vec<u8>> {
        debug!("get: {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .context(HttpSnafu { url: url.as_str() })?;
        let status = response.status();
        ensure!(
            status.is_success(),
            HttpStatusSnafu {
                url: url.as_str(),
                status: status.as_u16()
            }
        );
        let bytes = response.bytes().context(HttpSnafu { url: url.as_str() })?;
        Ok(bytes.to_vec())
    }
}

/// Spaces out requests: a fixed delay plus a random jitter between two calls.
pub struct Pacer {
    delay: Duration,
    jitter: Duration,
    rng: StdRng,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(delay: Duration, jitter: Duration) -> Pacer {
        Pacer {
            delay,
            jitter,
            rng: StdRng::seed_from_u64(42),
            last: None,
        }
    }

    /// A pacer that never waits.
    pub fn unpaced() -> Pacer {
        Pacer::new(Duration::ZERO, Duration::ZERO)
    }

    /// Blocks until the next request may be sent.
    pub fn wait(&mut self) {
        let jitter_ms = self.jitter.as_millis() as u64;
        let pause = if jitter_ms > 0 {
            self.delay + Duration::from_millis(self.rng.gen_range(0..=jitter_ms))
        } else {
            self.delay
        };
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < pause {
                thread::sleep(pause - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}
