//! Request side of the SCGI protocol: a netstring of NUL-separated header
//! pairs, `CONTENT_LENGTH` first, followed by the body.

use tokio::io::{AsyncRead, AsyncReadExt as _};

use crate::error::ScgiError;

const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_BODY_BYTES: usize = 1024 * 1024;
const MAX_LENGTH_DIGITS: usize = 10;
const CONTENT_LENGTH: &str = "CONTENT_LENGTH";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScgiRequest {
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ScgiRequest {
    /// First value sent under `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

pub async fn read_request<R>(reader: &mut R) -> Result<ScgiRequest, ScgiError>
where
    R: AsyncRead + Unpin,
{
    let header_len = read_netstring_len(reader).await?;
    if header_len > MAX_HEADER_BYTES {
        return Err(ScgiError::TooLarge(header_len));
    }

    let mut block = vec![0; header_len];
    reader.read_exact(&mut block).await?;
    if reader.read_u8().await? != b',' {
        return Err(ScgiError::MissingTerminator);
    }
    let headers = parse_headers(&block)?;

    let content_length = match headers.first() {
        Some((name, value)) if name == CONTENT_LENGTH => value
            .parse::<usize>()
            .map_err(|_| ScgiError::InvalidContentLength(value.clone()))?,
        _ => return Err(ScgiError::MissingContentLength),
    };
    if content_length > MAX_BODY_BYTES {
        return Err(ScgiError::InvalidContentLength(content_length.to_string()));
    }

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).await?;

    Ok(ScgiRequest { headers, body })
}

async fn read_netstring_len<R>(reader: &mut R) -> Result<usize, ScgiError>
where
    R: AsyncRead + Unpin,
{
    let mut digits = String::new();
    loop {
        let byte = reader.read_u8().await?;
        match byte {
            b':' if !digits.is_empty() => break,
            b'0'..=b'9' if digits.len() < MAX_LENGTH_DIGITS => digits.push(char::from(byte)),
            _ => {
                digits.push(char::from(byte));
                return Err(ScgiError::InvalidLength(digits));
            }
        }
    }
    digits
        .parse::<usize>()
        .map_err(|_| ScgiError::InvalidLength(digits))
}

fn parse_headers(block: &[u8]) -> Result<Vec<(String, String)>, ScgiError> {
    let Some(block) = block.strip_suffix(b"\0") else {
        if block.is_empty() {
            return Ok(Vec::new());
        }
        return Err(ScgiError::MissingTerminator);
    };

    let mut fields = block.split(|byte| *byte == 0);
    let mut headers = Vec::new();
    while let Some(name) = fields.next() {
        let name = String::from_utf8_lossy(name).into_owned();
        let Some(value) = fields.next() else {
            return Err(ScgiError::UnpairedHeader(name));
        };
        headers.push((name, String::from_utf8_lossy(value).into_owned()));
    }
    Ok(headers)
}

/// Encodes a request the way a front-end server sends it.
#[cfg(test)]
pub(crate) fn encode_request(headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut block = Vec::new();
    let content_length = body.len().to_string();
    for (name, value) in
        std::iter::once((CONTENT_LENGTH, content_length.as_str())).chain(headers.iter().copied())
    {
        block.extend_from_slice(name.as_bytes());
        block.push(0);
        block.extend_from_slice(value.as_bytes());
        block.push(0);
    }

    let mut encoded = format!("{}:", block.len()).into_bytes();
    encoded.extend_from_slice(&block);
    encoded.push(b',');
    encoded.extend_from_slice(body);
    encoded
}
