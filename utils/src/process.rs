use std::sync::OnceLock;

/// First label of the machine's hostname, e.g. `node07` for
/// `node07.cluster.example.edu`. Falls back to the local IP address, then to
/// `localhost`, when no hostname can be detected.
pub fn hostname() -> &'static str {
    static HOST: OnceLock<String> = OnceLock::new();
    HOST.get_or_init(|| {
        let raw = detect_hostname();
        raw.split('.')
            .next()
            .filter(|label| !label.is_empty())
            .unwrap_or("localhost")
            .to_string()
    })
}

fn detect_hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    if let Ok(name) = std::fs::read_to_string("/etc/hostname") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    #[cfg(feature = "ip")]
    if let Ok(ip) = local_ip_address::local_ip() {
        return ip.to_string();
    }
    "localhost".to_string()
}
