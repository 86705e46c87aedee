//! `multipart/related` 封装（SOAP with Attachments）。
//!
//! 根部件携带信封，其余部件按 `Content-ID` 成为附件；行分隔符固定为 `\r\n`。

use bytes::{BufMut, Bytes, BytesMut};
use soapline_core::{Attachment, AttachmentSet, ContentType, SoapError, codes};

/// 根部件的 `Content-ID`（不含尖括号）。
pub(crate) const ROOT_CONTENT_ID: &str = "rootpart@soapline";

const CRLF: &[u8] = b"\r\n";
/// 部件未声明 `Content-Type` 时的缺省值。
const DEFAULT_PART_CONTENT_TYPE: &str = "text/plain; charset=us-ascii";

fn malformed(detail: impl Into<String>) -> SoapError {
    SoapError::new(
        codes::MESSAGE_CREATION,
        format!("couldn't read multipart body: {}", detail.into()),
    )
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle, 0).is_some()
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// 选出一个不出现在任何部件中的边界。
fn pick_boundary(root: &[u8], attachments: &AttachmentSet) -> String {
    let mut n = 0u32;
    loop {
        let candidate = format!("soapline-part-boundary-{n}");
        let collides = contains(root, candidate.as_bytes())
            || attachments
                .iter()
                .any(|(_, attachment)| contains(&attachment.data, candidate.as_bytes()));
        if !collides {
            return candidate;
        }
        n += 1;
    }
}

fn put_part(out: &mut BytesMut, boundary: &str, content_type: &str, content_id: &str, body: &[u8]) {
    out.put_slice(b"--");
    out.put_slice(boundary.as_bytes());
    out.put_slice(CRLF);
    out.put_slice(b"Content-Type: ");
    out.put_slice(content_type.as_bytes());
    out.put_slice(CRLF);
    out.put_slice(b"Content-Transfer-Encoding: binary");
    out.put_slice(CRLF);
    out.put_slice(b"Content-ID: <");
    out.put_slice(content_id.as_bytes());
    out.put_slice(b">");
    out.put_slice(CRLF);
    out.put_slice(CRLF);
    out.put_slice(body);
    out.put_slice(CRLF);
}

/// 把信封与附件封装为多部件正文，返回字节与外层内容类型。
pub(crate) fn write_related(
    root: &[u8],
    root_content_type: &ContentType,
    attachments: &AttachmentSet,
) -> (Bytes, ContentType) {
    let boundary = pick_boundary(root, attachments);
    let mut out = BytesMut::with_capacity(
        root.len() + attachments.iter().map(|(_, a)| a.data.len() + 128).sum::<usize>() + 256,
    );
    put_part(&mut out, &boundary, root_content_type.as_str(), ROOT_CONTENT_ID, root);
    for (content_id, attachment) in attachments.iter() {
        put_part(&mut out, &boundary, &attachment.content_type, content_id, &attachment.data);
    }
    out.put_slice(b"--");
    out.put_slice(boundary.as_bytes());
    out.put_slice(b"--");
    out.put_slice(CRLF);

    let content_type = ContentType::new(format!(
        "multipart/related; type=\"{}\"; boundary=\"{boundary}\"; start=\"<{ROOT_CONTENT_ID}>\"",
        root_content_type.media_type()
    ));
    (out.freeze(), content_type)
}

struct Part {
    position: usize,
    content_type: String,
    content_id: Option<String>,
    body: Bytes,
}

/// 解析出的多部件正文。
pub(crate) struct Related {
    pub(crate) root: Bytes,
    pub(crate) root_content_type: ContentType,
    pub(crate) attachments: AttachmentSet,
}

/// 按内容类型的 `boundary`/`start` 参数拆分多部件正文。
pub(crate) fn read_related(body: &Bytes, content_type: &ContentType) -> Result<Related, SoapError> {
    let boundary = content_type
        .parameter("boundary")
        .ok_or_else(|| malformed("missing boundary parameter"))?;
    let start = content_type
        .parameter("start")
        .map(|cid| strip_angle(&cid).to_owned());
    let delimiter = format!("--{boundary}").into_bytes();

    let mut parts = Vec::new();
    let mut cursor = find(body, &delimiter, 0).ok_or_else(|| malformed("no opening boundary"))?;
    loop {
        let after = cursor + delimiter.len();
        if body[after..].starts_with(b"--") {
            break;
        }
        if !body[after..].starts_with(CRLF) {
            return Err(malformed("boundary line is not terminated"));
        }
        let headers_start = after + CRLF.len();
        // 紧跟的空行表示该部件没有头部。
        let (headers_end, body_start) = if body[headers_start..].starts_with(CRLF) {
            (headers_start, headers_start + CRLF.len())
        } else {
            let end = find(body, b"\r\n\r\n", headers_start)
                .ok_or_else(|| malformed("part headers are not terminated"))?;
            (end, end + 4)
        };
        let mut next_delimiter = Vec::with_capacity(delimiter.len() + 2);
        next_delimiter.extend_from_slice(CRLF);
        next_delimiter.extend_from_slice(&delimiter);
        let body_end = find(body, &next_delimiter, body_start)
            .ok_or_else(|| malformed("part is not closed by a boundary"))?;
        parts.push(parse_part(
            parts.len(),
            &body[headers_start..headers_end],
            body.slice(body_start..body_end),
        )?);
        cursor = body_end + CRLF.len();
    }

    let root_index = match &start {
        Some(cid) => parts
            .iter()
            .position(|part| part.content_id.as_deref() == Some(cid.as_str()))
            .ok_or_else(|| malformed(format!("start part <{cid}> not found")))?,
        None if !parts.is_empty() => 0,
        None => return Err(malformed("no parts")),
    };
    let root = parts.remove(root_index);
    let mut attachments = AttachmentSet::default();
    for part in parts {
        let content_id = part
            .content_id
            .unwrap_or_else(|| anonymous_content_id(part.position));
        attachments.insert(content_id, Attachment::new(part.content_type, part.body));
    }
    Ok(Related {
        root: root.body,
        root_content_type: ContentType::new(root.content_type),
        attachments,
    })
}

fn strip_angle(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('<')
        .and_then(|v| v.strip_suffix('>'))
        .unwrap_or(value)
}

/// 合并以空白开头的续行，返回逻辑头部行。
fn unfold(headers: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in headers.split("\r\n").filter(|line| !line.is_empty()) {
        match lines.last_mut() {
            Some(current) if line.starts_with([' ', '\t']) => {
                current.push(' ');
                current.push_str(line.trim_start());
            }
            _ => lines.push(line.to_owned()),
        }
    }
    lines
}

/// 未声明 `Content-ID` 的部件按其在正文中的位置（从 0 起）命名。
fn anonymous_content_id(position: usize) -> String {
    format!("part-{position}")
}

fn parse_part(position: usize, headers: &[u8], body: Bytes) -> Result<Part, SoapError> {
    let headers = std::str::from_utf8(headers)
        .map_err(|err| malformed("part headers are not UTF-8").with_cause(err))?;
    let mut part = Part {
        position,
        content_type: DEFAULT_PART_CONTENT_TYPE.to_owned(),
        content_id: None,
        body,
    };
    for line in unfold(headers) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed(format!("invalid part header `{line}`")))?;
        let name = name.trim();
        if name.eq_ignore_ascii_case("content-type") {
            part.content_type = value.trim().to_owned();
        } else if name.eq_ignore_ascii_case("content-id") {
            part.content_id = Some(strip_angle(value).to_owned());
        }
    }
    Ok(part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_avoids_part_content() {
        let mut attachments = AttachmentSet::default();
        attachments.insert(
            "a@x",
            Attachment::new("text/plain", "--soapline-part-boundary-0 inside"),
        );
        let root_ct = ContentType::new("text/xml; charset=utf-8");
        let (bytes, ct) = write_related(b"<e/>", &root_ct, &attachments);
        assert_eq!(ct.parameter("boundary").as_deref(), Some("soapline-part-boundary-1"));
        assert_eq!(ct.parameter("type").as_deref(), Some("text/xml"));

        let related = read_related(&bytes, &ct).expect("合法多部件");
        assert_eq!(&related.root[..], b"<e/>");
        assert_eq!(related.root_content_type, root_ct);
        assert_eq!(related.attachments, attachments);
    }

    #[test]
    fn missing_start_part_is_rejected() {
        let ct = ContentType::new("multipart/related; boundary=\"b\"; start=\"<nope>\"");
        let body = Bytes::from_static(b"--b\r\nContent-ID: <root>\r\n\r\n<e/>\r\n--b--\r\n");
        let err = read_related(&body, &ct).map(|_| ()).expect_err("缺少根部件");
        assert_eq!(err.code(), codes::MESSAGE_CREATION);
    }

    #[test]
    fn part_without_headers_defaults_to_plain_text() {
        let ct = ContentType::new("multipart/related; boundary=\"b\"; start=\"<root>\"");
        let body = Bytes::from_static(
            b"--b\r\nContent-ID: <root>\r\n\r\n<e/>\r\n--b\r\n\r\nplain\r\n--b--\r\n",
        );
        let related = read_related(&body, &ct).expect("无头部的部件合法");
        assert_eq!(&related.root[..], b"<e/>");
        let plain = related.attachments.get("part-1").expect("按位置命名");
        assert_eq!(plain.content_type, DEFAULT_PART_CONTENT_TYPE);
        assert_eq!(&plain.data[..], b"plain");

        let ct = ContentType::new("multipart/related; boundary=\"b\"");
        let body = Bytes::from_static(b"--b\r\n\r\n<e/>\r\n--b--\r\n");
        let related = read_related(&body, &ct).expect("空头部块合法");
        assert_eq!(&related.root[..], b"<e/>");
        assert_eq!(related.root_content_type.as_str(), DEFAULT_PART_CONTENT_TYPE);
    }

    #[test]
    fn folded_header_lines_are_unfolded() {
        let ct = ContentType::new("multipart/related; boundary=\"b\"; start=\"<root>\"");
        let body = Bytes::from_static(
            b"--b\r\nContent-Type: text/xml;\r\n charset=utf-8\r\nContent-ID:\r\n\t<root>\r\n\r\n<e/>\r\n--b--\r\n",
        );
        let related = read_related(&body, &ct).expect("续行合法");
        assert_eq!(related.root_content_type.media_type(), "text/xml");
        assert_eq!(related.root_content_type.parameter("charset").as_deref(), Some("utf-8"));
        assert_eq!(&related.root[..], b"<e/>");
    }
}
