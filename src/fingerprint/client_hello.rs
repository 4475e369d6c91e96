//! Static ClientHello shapes, one per [`FingerprintId`].
//!
//! Values are IANA code points in the order the browser sends them. The
//! BoringSSL connector in `transport::impersonate` turns each spec into a
//! handshake: TLS 1.2 cipher order, group order and signature algorithms are
//! applied as listed, GREASE and extension permutation are switched on per
//! spec, and optional extensions (`status_request`, SCT, session tickets) are
//! enabled only when the list carries them. `extensions` also feeds JA3.

use super::mapping::FingerprintId;

pub const TLS13: u16 = 0x0304;
pub const TLS12: u16 = 0x0303;

/// Byte-level shape of a browser ClientHello.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHelloSpec {
    pub versions: &'static [u16],
    pub cipher_suites: &'static [u16],
    pub supported_groups: &'static [u16],
    pub extensions: &'static [u16],
    pub ec_point_formats: &'static [u8],
    pub signature_algorithms: &'static [u16],
    pub alpn: &'static [&'static str],
    pub grease: bool,
    /// Shuffle extension order per connection, as Chrome does since 110.
    pub permute_extensions: bool,
}

impl ClientHelloSpec {
    /// JA3 string: `version,ciphers,extensions,groups,point_formats`.
    pub fn ja3(&self) -> String {
        fn join<T: ToString>(items: impl Iterator<Item = T>) -> String {
            items.map(|item| item.to_string()).collect::<Vec<_>>().join("-")
        }

        format!(
            "{},{},{},{},{}",
            TLS12,
            join(self.cipher_suites.iter()),
            join(self.extensions.iter()),
            join(self.supported_groups.iter()),
            join(self.ec_point_formats.iter()),
        )
    }

    pub fn offers_alpn(&self) -> bool {
        !self.alpn.is_empty()
    }

    pub fn offers_extension(&self, id: u16) -> bool {
        self.extensions.contains(&id)
    }
}

const CHROME_CIPHERS: &[u16] = &[
    0x1301, 0x1302, 0x1303, 0xc02b, 0xc02f, 0xc02c, 0xc030, 0xcca9, 0xcca8, 0xc013, 0xc014,
    0x009c, 0x009d, 0x002f, 0x0035,
];

const FIREFOX_CIPHERS: &[u16] = &[
    0x1301, 0x1303, 0x1302, 0xc02b, 0xc02f, 0xcca9, 0xcca8, 0xc02c, 0xc030, 0xc00a, 0xc009,
    0xc013, 0xc014, 0x009c, 0x009d, 0x002f, 0x0035,
];

const SAFARI_CIPHERS: &[u16] = &[
    0x1301, 0x1302, 0x1303, 0xc02c, 0xc02b, 0xcca9, 0xc030, 0xc02f, 0xcca8, 0xc00a, 0xc009,
    0xc014, 0xc013, 0x009d, 0x009c, 0x0035, 0x002f, 0xc008, 0xc012, 0x000a,
];

const CHROME_SIGALGS: &[u16] = &[
    0x0403, 0x0804, 0x0401, 0x0503, 0x0805, 0x0501, 0x0806, 0x0601,
];

const FIREFOX_SIGALGS: &[u16] = &[
    0x0403, 0x0503, 0x0603, 0x0804, 0x0805, 0x0806, 0x0401, 0x0501, 0x0601, 0x0203, 0x0201,
];

const SAFARI_SIGALGS: &[u16] = &[
    0x0403, 0x0804, 0x0401, 0x0503, 0x0203, 0x0805, 0x0501, 0x0806, 0x0601, 0x0201,
];

const BROWSER_ALPN: &[&str] = &["h2", "http/1.1"];
const UNCOMPRESSED: &[u8] = &[0];
const MODERN_VERSIONS: &[u16] = &[TLS13, TLS12];

const CHROME_131: ClientHelloSpec = ClientHelloSpec {
    versions: MODERN_VERSIONS,
    cipher_suites: CHROME_CIPHERS,
    supported_groups: &[4588, 29, 23, 24],
    extensions: &[
        0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17613, 65037, 21,
    ],
    ec_point_formats: UNCOMPRESSED,
    signature_algorithms: CHROME_SIGALGS,
    alpn: BROWSER_ALPN,
    grease: true,
    permute_extensions: true,
};

const CHROME_120: ClientHelloSpec = ClientHelloSpec {
    versions: MODERN_VERSIONS,
    cipher_suites: CHROME_CIPHERS,
    supported_groups: &[29, 23, 24],
    extensions: &[0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513, 21],
    ec_point_formats: UNCOMPRESSED,
    signature_algorithms: CHROME_SIGALGS,
    alpn: BROWSER_ALPN,
    grease: true,
    permute_extensions: true,
};

const CHROME_106: ClientHelloSpec = ClientHelloSpec {
    versions: MODERN_VERSIONS,
    cipher_suites: CHROME_CIPHERS,
    supported_groups: &[29, 23, 24],
    extensions: &[0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513, 21],
    ec_point_formats: UNCOMPRESSED,
    signature_algorithms: CHROME_SIGALGS,
    alpn: BROWSER_ALPN,
    grease: true,
    permute_extensions: false,
};

const CHROME_83: ClientHelloSpec = ClientHelloSpec {
    versions: MODERN_VERSIONS,
    cipher_suites: CHROME_CIPHERS,
    supported_groups: &[29, 23, 24],
    extensions: &[0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 21],
    ec_point_formats: UNCOMPRESSED,
    signature_algorithms: CHROME_SIGALGS,
    alpn: BROWSER_ALPN,
    grease: true,
    permute_extensions: false,
};

const FIREFOX_128: ClientHelloSpec = ClientHelloSpec {
    versions: MODERN_VERSIONS,
    cipher_suites: FIREFOX_CIPHERS,
    supported_groups: &[4588, 29, 23, 24, 25, 256, 257],
    extensions: &[0, 23, 65281, 10, 11, 35, 16, 5, 34, 51, 43, 13, 45, 28, 27, 65037],
    ec_point_formats: UNCOMPRESSED,
    signature_algorithms: FIREFOX_SIGALGS,
    alpn: BROWSER_ALPN,
    grease: false,
    permute_extensions: false,
};

const FIREFOX_120: ClientHelloSpec = ClientHelloSpec {
    versions: MODERN_VERSIONS,
    cipher_suites: FIREFOX_CIPHERS,
    supported_groups: &[29, 23, 24, 25, 256, 257],
    extensions: &[0, 23, 65281, 10, 11, 35, 16, 5, 34, 51, 43, 13, 45, 28, 65037],
    ec_point_formats: UNCOMPRESSED,
    signature_algorithms: FIREFOX_SIGALGS,
    alpn: BROWSER_ALPN,
    grease: false,
    permute_extensions: false,
};

const FIREFOX_102: ClientHelloSpec = ClientHelloSpec {
    versions: MODERN_VERSIONS,
    cipher_suites: FIREFOX_CIPHERS,
    supported_groups: &[29, 23, 24, 25, 256, 257],
    extensions: &[0, 23, 65281, 10, 11, 35, 16, 5, 34, 51, 43, 13, 45, 28, 21],
    ec_point_formats: UNCOMPRESSED,
    signature_algorithms: FIREFOX_SIGALGS,
    alpn: BROWSER_ALPN,
    grease: false,
    permute_extensions: false,
};

const FIREFOX_65: ClientHelloSpec = ClientHelloSpec {
    versions: MODERN_VERSIONS,
    cipher_suites: FIREFOX_CIPHERS,
    supported_groups: &[29, 23, 24, 25, 256, 257],
    extensions: &[0, 23, 65281, 10, 11, 35, 16, 5, 51, 43, 13, 45, 28, 21],
    ec_point_formats: UNCOMPRESSED,
    signature_algorithms: FIREFOX_SIGALGS,
    alpn: BROWSER_ALPN,
    grease: false,
    permute_extensions: false,
};

const SAFARI_17: ClientHelloSpec = ClientHelloSpec {
    versions: MODERN_VERSIONS,
    cipher_suites: SAFARI_CIPHERS,
    supported_groups: &[29, 23, 24, 25],
    extensions: &[0, 23, 65281, 10, 11, 16, 5, 13, 18, 51, 45, 43, 27, 21],
    ec_point_formats: UNCOMPRESSED,
    signature_algorithms: SAFARI_SIGALGS,
    alpn: BROWSER_ALPN,
    grease: true,
    permute_extensions: false,
};

const SAFARI_16: ClientHelloSpec = ClientHelloSpec {
    versions: MODERN_VERSIONS,
    cipher_suites: SAFARI_CIPHERS,
    supported_groups: &[29, 23, 24, 25],
    extensions: &[0, 23, 65281, 10, 11, 16, 5, 13, 18, 51, 45, 43, 21],
    ec_point_formats: UNCOMPRESSED,
    signature_algorithms: SAFARI_SIGALGS,
    alpn: BROWSER_ALPN,
    grease: true,
    permute_extensions: false,
};

const SAFARI_13: ClientHelloSpec = ClientHelloSpec {
    versions: MODERN_VERSIONS,
    cipher_suites: SAFARI_CIPHERS,
    supported_groups: &[29, 23, 24, 25],
    extensions: &[0, 23, 65281, 10, 11, 16, 5, 13, 18, 51, 45, 43, 21],
    ec_point_formats: UNCOMPRESSED,
    signature_algorithms: SAFARI_SIGALGS,
    alpn: BROWSER_ALPN,
    grease: false,
    permute_extensions: false,
};

/// Resolve the static ClientHello shape for a fingerprint handle.
pub fn client_hello_spec(id: FingerprintId) -> &'static ClientHelloSpec {
    match id {
        FingerprintId::Chrome131 => &CHROME_131,
        FingerprintId::Chrome120 => &CHROME_120,
        FingerprintId::Chrome106 => &CHROME_106,
        FingerprintId::Chrome83 => &CHROME_83,
        FingerprintId::Firefox128 => &FIREFOX_128,
        FingerprintId::Firefox120 => &FIREFOX_120,
        FingerprintId::Firefox102 => &FIREFOX_102,
        FingerprintId::Firefox65 => &FIREFOX_65,
        FingerprintId::Safari17 => &SAFARI_17,
        FingerprintId::Safari16 => &SAFARI_16,
        FingerprintId::Safari13 => &SAFARI_13,
    }
}
