//! Canonical reason phrases for numeric status codes
//!
//! Covers the standard 1xx-5xx codes plus the non-standard codes historically
//! emitted by web servers, proxies and CDNs (nginx, IIS, Cloudflare, AWS ELB).

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

pub const STATUS_PHRASES: [(u16, &str); 91] = [
    (100, "Continue"),
    (101, "Switching Protocols"),
    (102, "Processing"),
    (103, "Early Hints"),
    (200, "OK"),
    (201, "Created"),
    (202, "Accepted"),
    (203, "Non-Authoritative Information"),
    (204, "No Content"),
    (205, "Reset Content"),
    (206, "Partial Content"),
    (207, "Multi-Status"),
    (208, "Already Reported"),
    (218, "This is fine"),
    (226, "IM Used"),
    (300, "Multiple Choices"),
    (301, "Moved Permanently"),
    (302, "Found"),
    (303, "See Other"),
    (304, "Not Modified"),
    (305, "Use Proxy"),
    (306, "Switch Proxy"),
    (307, "Temporary Redirect"),
    (308, "Permanent Redirect"),
    (400, "Bad Request"),
    (401, "Unauthorized"),
    (402, "Payment Required"),
    (403, "Forbidden"),
    (404, "Not Found"),
    (405, "Method Not Allowed"),
    (406, "Not Acceptable"),
    (407, "Proxy Authentication Required"),
    (408, "Request Timeout"),
    (409, "Conflict"),
    (410, "Gone"),
    (411, "Length Required"),
    (412, "Precondition Failed"),
    (413, "Request Entity Too Large"),
    (414, "Request-URI Too Long"),
    (415, "Unsupported Media Type"),
    (416, "Requested Range Not Satisfiable"),
    (417, "Expectation Failed"),
    (418, "I'm a teapot"),
    (419, "Authentication Timeout"),
    (420, "Enhance Your Calm"),
    (421, "Misdirected Request"),
    (422, "Unprocessable Entity"),
    (423, "Locked"),
    (424, "Failed Dependency"),
    (425, "Too Early"),
    (426, "Upgrade Required"),
    (428, "Precondition Required"),
    (429, "Too Many Requests"),
    (431, "Request Header Fields Too Large"),
    (440, "Login Timeout"),
    (444, "No Response"),
    (449, "Retry With"),
    (450, "Blocked by Windows Parental Controls"),
    (451, "Unavailable For Legal Reasons"),
    (460, "Client Closed Connection Prematurely"),
    (494, "Request Header Too Large"),
    (495, "Cert Error"),
    (496, "No Cert"),
    (497, "HTTP to HTTPS"),
    (498, "Token expired/invalid"),
    (499, "Client Closed Request"),
    (500, "Internal Server Error"),
    (501, "Not Implemented"),
    (502, "Bad Gateway"),
    (503, "Service Unavailable"),
    (504, "Gateway Timeout"),
    (505, "HTTP Version Not Supported"),
    (506, "Variant Also Negotiates"),
    (507, "Insufficient Storage"),
    (508, "Loop Detected"),
    (509, "Bandwidth Limit Exceeded"),
    (510, "Not Extended"),
    (511, "Network Authentication Required"),
    (520, "Web Server Returned an Unknown Error"),
    (521, "Web Server Is Down"),
    (522, "Connection Timed Out"),
    (523, "Origin Is Unreachable"),
    (524, "A Timeout Occurred"),
    (525, "SSL Handshake Failed"),
    (526, "Invalid SSL Certificate"),
    (527, "Railgun Error"),
    (529, "Site is overloaded"),
    (530, "Site is frozen"),
    (561, "Unauthorized"),
    (598, "Network read timeout error"),
    (599, "Network connect timeout error"),
];

/// Read-only code-to-phrase mapping, built once and shared.
#[derive(Debug, Clone)]
pub struct StatusTable {
    phrases: HashMap<u16, &'static str>,
}

impl StatusTable {
    pub fn standard() -> Self {
        Self {
            phrases: STATUS_PHRASES.iter().copied().collect(),
        }
    }

    pub fn reason_phrase(&self, code: u16) -> Option<&'static str> {
        self.phrases.get(&code).copied()
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

impl Default for StatusTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Process-wide standard table, built on first use and shared by reference.
pub fn standard_table() -> Arc<StatusTable> {
    static TABLE: OnceLock<Arc<StatusTable>> = OnceLock::new();
    TABLE
        .get_or_init(|| Arc::new(StatusTable::standard()))
        .clone()
}

pub fn reason_phrase(code: u16) -> Option<&'static str> {
    standard_table().reason_phrase(code)
}
