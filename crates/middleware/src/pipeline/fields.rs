// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Request-attribute extraction for record enrichment.

use serde_json::Value;

use super::RequestInfo;
use crate::config::RequestField;

/// The property name a request field is enriched under.
pub(crate) fn field_name(field: RequestField) -> &'static str {
    match field {
        RequestField::Method => "Method",
        RequestField::Path => "Path",
        RequestField::Ip => "Ip",
        RequestField::UserAgent => "UserAgent",
        RequestField::Referer => "Referer",
        RequestField::Proto => "Proto",
        RequestField::Host => "Host",
    }
}

/// Resolve the client address: first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the transport peer address.
pub(crate) fn client_ip(info: &RequestInfo) -> Option<String> {
    if let Some(forwarded) = info.header("x-forwarded-for") {
        let first = forwarded.split(',').next().unwrap_or("").trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }
    if let Some(real_ip) = info.header("x-real-ip") {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return Some(real_ip.to_string());
        }
    }
    info.remote_addr.map(|addr| addr.ip().to_string())
}

/// The value a request field contributes, or `None` when the request does
/// not carry it.
pub(crate) fn request_field_value(field: RequestField, info: &RequestInfo) -> Option<Value> {
    match field {
        RequestField::Method => Some(Value::String(info.method.as_str().to_string())),
        RequestField::Path => Some(Value::String(info.path().to_string())),
        RequestField::Ip => client_ip(info).map(Value::String),
        RequestField::UserAgent => info
            .header("user-agent")
            .map(|v| Value::String(v.to_string())),
        RequestField::Referer => info.header("referer").map(|v| Value::String(v.to_string())),
        RequestField::Proto => Some(Value::String(format!("{:?}", info.version))),
        RequestField::Host => info
            .header("host")
            .map(ToString::to_string)
            .or_else(|| info.uri.host().map(ToString::to_string))
            .map(Value::String),
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use http::{HeaderMap, HeaderValue, Method, Uri, Version};

    use super::*;

    fn info_with(headers: &[(&'static str, &str)], remote: Option<&str>) -> RequestInfo {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        RequestInfo {
            method:      Method::GET,
            uri:         Uri::from_static("/api/users"),
            version:     Version::HTTP_11,
            headers:     map,
            remote_addr: remote.map(|r| r.parse::<SocketAddr>().unwrap()),
        }
    }

    #[test]
    fn forwarded_for_takes_precedence() {
        let info = info_with(
            &[
                ("x-forwarded-for", "203.0.113.9, 10.0.0.1"),
                ("x-real-ip", "198.51.100.2"),
            ],
            Some("127.0.0.1:9000"),
        );
        assert_eq!(client_ip(&info).as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn real_ip_is_second_choice() {
        let info = info_with(&[("x-real-ip", "198.51.100.2")], Some("127.0.0.1:9000"));
        assert_eq!(client_ip(&info).as_deref(), Some("198.51.100.2"));
    }

    #[test]
    fn remote_addr_is_the_fallback() {
        let info = info_with(&[], Some("127.0.0.1:9000"));
        assert_eq!(client_ip(&info).as_deref(), Some("127.0.0.1"));
        assert_eq!(client_ip(&info_with(&[], None)), None);
    }

    #[test]
    fn empty_forwarded_entries_are_skipped() {
        let info = info_with(&[("x-forwarded-for", " , 10.0.0.1")], None);
        assert_eq!(client_ip(&info), None);
    }

    #[test]
    fn field_values_cover_request_attributes() {
        let info = info_with(
            &[
                ("user-agent", "curl/8.0"),
                ("referer", "https://example.com/"),
                ("host", "api.example.com"),
            ],
            None,
        );
        assert_eq!(
            request_field_value(RequestField::Method, &info),
            Some(Value::String("GET".to_string()))
        );
        assert_eq!(
            request_field_value(RequestField::Path, &info),
            Some(Value::String("/api/users".to_string()))
        );
        assert_eq!(
            request_field_value(RequestField::UserAgent, &info),
            Some(Value::String("curl/8.0".to_string()))
        );
        assert_eq!(
            request_field_value(RequestField::Proto, &info),
            Some(Value::String("HTTP/1.1".to_string()))
        );
        assert_eq!(
            request_field_value(RequestField::Host, &info),
            Some(Value::String("api.example.com".to_string()))
        );
        assert_eq!(request_field_value(RequestField::Ip, &info), None);
    }
}
