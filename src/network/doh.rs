//! Well-known DNS-over-HTTPS resolvers.
//!
//! Browsers that resolve through these endpoints bypass the hosts file, so
//! their addresses are blocked at the firewall and their host names are
//! redirected in the managed hosts section.

/// Ports used by DoH (HTTPS, including HTTP/3 over UDP) and DNS-over-TLS
pub const DOH_TCP_PORTS: &[u16] = &[443, 853];
pub const DOH_UDP_PORTS: &[u16] = &[443];

pub struct DohProvider {
    pub name: &'static str,
    pub hostnames: &'static [&'static str],
    pub addresses: &'static [&'static str],
}

pub const DOH_PROVIDERS: &[DohProvider] = &[
    DohProvider {
        name: "Cloudflare",
        hostnames: &[
            "cloudflare-dns.com",
            "mozilla.cloudflare-dns.com",
            "chrome.cloudflare-dns.com",
            "one.one.one.one",
            "family.cloudflare-dns.com",
        ],
        addresses: &[
            "1.1.1.1",
            "1.0.0.1",
            "1.1.1.3",
            "1.0.0.3",
            "2606:4700:4700::1111",
            "2606:4700:4700::1001",
        ],
    },
    DohProvider {
        name: "Google",
        hostnames: &["dns.google", "dns.google.com", "8888.google"],
        addresses: &[
            "8.8.8.8",
            "8.8.4.4",
            "2001:4860:4860::8888",
            "2001:4860:4860::8844",
        ],
    },
    DohProvider {
        name: "Quad9",
        hostnames: &["dns.quad9.net", "dns9.quad9.net", "dns10.quad9.net"],
        addresses: &["9.9.9.9", "149.112.112.112", "2620:fe::fe", "2620:fe::9"],
    },
    DohProvider {
        name: "OpenDNS",
        hostnames: &["doh.opendns.com", "doh.familyshield.opendns.com"],
        addresses: &["208.67.222.222", "208.67.220.220", "2620:119:35::35"],
    },
    DohProvider {
        name: "AdGuard",
        hostnames: &["dns.adguard.com", "dns.adguard-dns.com", "dns-family.adguard.com"],
        addresses: &["94.140.14.14", "94.140.15.15", "2a10:50c0::ad1:ff"],
    },
    DohProvider {
        name: "NextDNS",
        hostnames: &["dns.nextdns.io"],
        addresses: &["45.90.28.0", "45.90.30.0"],
    },
    DohProvider {
        name: "CleanBrowsing",
        hostnames: &["doh.cleanbrowsing.org"],
        addresses: &["185.228.168.168", "185.228.169.168"],
    },
    DohProvider {
        name: "Mullvad",
        hostnames: &["dns.mullvad.net", "doh.mullvad.net"],
        addresses: &["194.242.2.2"],
    },
];

/// IPv4 resolver addresses
pub fn ipv4_addresses() -> Vec<&'static str> {
    all_addresses().filter(|a| !a.contains(':')).collect()
}

/// IPv6 resolver addresses
pub fn ipv6_addresses() -> Vec<&'static str> {
    all_addresses().filter(|a| a.contains(':')).collect()
}

/// Resolver host names, redirected in the hosts section
pub fn hostnames() -> Vec<&'static str> {
    DOH_PROVIDERS
        .iter()
        .flat_map(|p| p.hostnames.iter().copied())
        .collect()
}

fn all_addresses() -> impl Iterator<Item = &'static str> {
    DOH_PROVIDERS.iter().flat_map(|p| p.addresses.iter().copied())
}
