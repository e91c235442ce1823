use anyhow::Result;

/// Build an inline ICY metadata block. The first byte counts 16-byte chunks,
/// the payload follows zero-padded up to that count.
/// Black magic format https://thecodeartist.blogspot.com/2013/02/shoutcast-internet-radio-protocol.html
pub fn metadata_encode(title: &str, url: &str) -> Vec<u8> {
    let mut vec = vec![0];
    vec.extend_from_slice(b"StreamTitle='");
    vec.extend_from_slice(title.as_bytes());
    vec.extend_from_slice(b"';StreamUrl='");
    vec.extend_from_slice(url.as_bytes());
    vec.extend_from_slice(b"';");

    let len = vec.len() - 1;
    vec[0] = {
        let down = len >> 4;
        let remainder = len & 0b1111;
        if remainder > 0 {
            // Pad with zeroes
            vec.append(&mut vec![0; 16 - remainder]);
            down + 1
        } else {
            down
        }
    } as u8;

    vec
}

/// Parse a metadata payload back into its title/url parts, used by tests and
/// anything that wants to verify what went over the wire
pub fn metadata_decode(metadata: &str) -> Result<(Option<String>, Option<String>)> {
    let mut title = None;
    let mut url   = None;

    for kv in metadata.trim_end_matches('\0').split(';').take(2) {
        if kv.is_empty() {
            continue;
        }
        let (k, v) = match kv.split_once('=') {
            Some(v) => v,
            None => return Err(anyhow::Error::msg("Invalid metadata"))
        };

        let v = if v.len() >= 2 && v.starts_with('\'') && v.ends_with('\'') {
            v[1..v.len()-1].to_string()
        } else {
            return Err(anyhow::Error::msg("Metadata value uncorrect formatting"));
        };

        match k {
            "StreamTitle" => title = Some(v),
            "StreamUrl"   => url = Some(v),
            _             => ()
        }
    }

    Ok((title, url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_layout_is_length_payload_padding() {
        let block   = metadata_encode("song", "/");
        let payload = b"StreamTitle='song';StreamUrl='/';";
        // 33 payload bytes round up to three 16-byte chunks
        assert_eq!(block[0], 3);
        assert_eq!(block.len(), 1 + 3 * 16);
        assert_eq!(&block[1..1 + payload.len()], payload);
        assert!(block[1 + payload.len()..].iter().all(|b| *b == 0));
    }

    #[test]
    fn exact_multiple_needs_no_padding() {
        // the constant framing is 28 bytes, a 4-byte title with an empty
        // url lands on 32 exactly
        let block = metadata_encode("abcd", "");
        assert_eq!(block.len() - 1, 32);
        assert_eq!(block[0], 2);
    }

    #[test]
    fn block_length_matches_chunk_count() {
        for title_len in 0..48 {
            let title = "x".repeat(title_len);
            let block = metadata_encode(&title, "/");
            let payload_len = "StreamTitle='';StreamUrl='/';".len() + title_len;
            assert_eq!(block[0] as usize, payload_len.div_ceil(16));
            assert_eq!(block.len(), 1 + (block[0] as usize) * 16);
        }
    }

    #[test]
    fn decode_round_trips() {
        let block = metadata_encode("Evening Drive", "/");
        let text  = std::str::from_utf8(&block[1..]).unwrap();
        let (title, url) = metadata_decode(text).unwrap();
        assert_eq!(title.as_deref(), Some("Evening Drive"));
        assert_eq!(url.as_deref(), Some("/"));
    }
}
