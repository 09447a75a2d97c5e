//! Response body handlers
//!
//! Large documents (sitemaps) are spooled to an anonymous temporary file
//! chunk by chunk so they never sit in memory whole. Plain bodies are copied
//! as-is, gzip bodies are inflated on the way to disk. Headers and the URL
//! only suggest a handler; the first bytes of the body decide, since the
//! client may already have undone a gzip `Content-Encoding`.

use crate::CrawlError;
use flate2::write::GzDecoder;
use reqwest::header::CONTENT_TYPE;
use reqwest::Response;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// How a response body is turned into readable bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyDecoder {
    Plain,
    Gzip,
}

impl BodyDecoder {
    /// Picks the gzip handler when the content type says so or the path ends in `.gz`
    pub fn select(content_type: Option<&str>, url: &str) -> Self {
        let gzip_type = content_type
            .map(|ct| ct.to_ascii_lowercase().contains("gzip"))
            .unwrap_or(false);

        let gz_path = url::Url::parse(url)
            .map(|u| u.path().to_ascii_lowercase().ends_with(".gz"))
            .unwrap_or_else(|_| url.to_ascii_lowercase().ends_with(".gz"));

        if gzip_type || gz_path {
            Self::Gzip
        } else {
            Self::Plain
        }
    }

    /// Settles the handler on the first body bytes
    ///
    /// The gzip magic number wins over any hint; a chunk too short to carry
    /// it keeps the hint.
    pub fn confirm(self, first_chunk: &[u8]) -> Self {
        if first_chunk.len() < GZIP_MAGIC.len() {
            self
        } else if first_chunk.starts_with(&GZIP_MAGIC) {
            Self::Gzip
        } else {
            Self::Plain
        }
    }

    /// Selects the handler for a response
    pub fn for_response(response: &Response) -> Self {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        Self::select(content_type, response.url().as_str())
    }

    /// Streams the response body into a temporary file, rewound and ready to read
    pub async fn spool(self, mut response: Response) -> Result<File, CrawlError> {
        let url = response.url().to_string();
        let mut spool = Spool::Pending(tempfile::tempfile()?);

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| CrawlError::transport(&url, e))?
        {
            if let Spool::Pending(_) = spool {
                let decoder = self.confirm(&chunk);
                if decoder != self {
                    tracing::debug!(url = %url, hinted = ?self, actual = ?decoder, "Body encoding differs from its hint");
                }
                spool = spool.start(decoder);
            }
            spool.write(&chunk).map_err(|e| decode_error(&url, e))?;
        }

        let mut file = spool.finish().map_err(|e| decode_error(&url, e))?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }
}

enum Spool {
    /// No body bytes seen yet
    Pending(File),
    Plain(File),
    Gzip(GzDecoder<File>),
}

impl Spool {
    fn start(self, decoder: BodyDecoder) -> Self {
        match (self, decoder) {
            (Self::Pending(file), BodyDecoder::Plain) => Self::Plain(file),
            (Self::Pending(file), BodyDecoder::Gzip) => Self::Gzip(GzDecoder::new(file)),
            (started, _) => started,
        }
    }

    fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Pending(file) | Self::Plain(file) => file.write_all(chunk),
            Self::Gzip(decoder) => decoder.write_all(chunk),
        }
    }

    fn finish(self) -> std::io::Result<File> {
        match self {
            Self::Pending(file) | Self::Plain(file) => Ok(file),
            Self::Gzip(decoder) => decoder.finish(),
        }
    }
}

fn decode_error(url: &str, err: std::io::Error) -> CrawlError {
    CrawlError::Transport {
        url: url.to_string(),
        message: format!("failed to decode body: {}", err),
    }
}
