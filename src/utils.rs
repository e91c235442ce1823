use std::net::SocketAddr;

#[derive(Debug)]
pub struct Query {
    pub key: String,
    pub val: String
}

pub fn get_queries(path: &str) -> Vec<Query> {
    let mut queries = Vec::new();
    if let Some(i) = path.find('?') {
        for query in path[i+1..].split('&') {
            if let Some((key, val)) = query.replace('+', " ").split_once('=') {
                let key = urlencoding::decode(key);
                let val = urlencoding::decode(val);
                if let Ok(key) = key {
                    if let Ok(val) = val {
                        queries.push(Query { key: key.to_string(), val: val.to_string() });
                    }
                }
            }
        }
    }

    queries
}

pub fn query_val<'a>(key: &str, queries: &'a [Query]) -> Option<&'a str> {
    queries.iter()
        .find(|q| q.key == key)
        .map(|q| q.val.as_str())
}

pub fn get_header<'a>(key: &str, headers: &[httparse::Header<'a>]) -> Option<&'a [u8]> {
    let key = key.to_lowercase();
    for header in headers {
        if header.name.to_lowercase() == key {
            return Some(header.value)
        }
    }
    None
}

/// Client address for logging: the last X-Forwarded-For hop when a reverse
/// proxy fills it in, the TCP peer otherwise
pub fn real_ip(headers: &[httparse::Header<'_>], peer: &SocketAddr) -> String {
    if let Some(forwarded) = get_header("X-Forwarded-For", headers) {
        if let Ok(list) = std::str::from_utf8(forwarded) {
            if let Some(last) = list.split(',').next_back() {
                let last = last.trim();
                if !last.is_empty() {
                    return last.to_owned();
                }
            }
        }
    }
    peer.ip().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header<'a>(name: &'a str, value: &'a [u8]) -> httparse::Header<'a> {
        httparse::Header { name, value }
    }

    #[test]
    fn queries_decode_and_split() {
        let q = get_queries("/next/set?hash=ab12&x=a+b%21");
        assert_eq!(q.len(), 2);
        assert_eq!(query_val("hash", &q), Some("ab12"));
        assert_eq!(query_val("x", &q), Some("a b!"));
        assert_eq!(query_val("missing", &q), None);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = [header("Icy-MetaData", b"1")];
        assert_eq!(get_header("icy-metadata", &headers), Some(b"1".as_slice()));
        assert_eq!(get_header("accept", &headers), None);
    }

    #[test]
    fn forwarded_for_takes_the_last_hop() {
        let peer: SocketAddr = "10.0.0.9:4444".parse().unwrap();
        let headers = [header("X-Forwarded-For", b"203.0.113.7, 198.51.100.2")];
        assert_eq!(real_ip(&headers, &peer), "198.51.100.2");
        assert_eq!(real_ip(&[], &peer), "10.0.0.9");
    }
}
