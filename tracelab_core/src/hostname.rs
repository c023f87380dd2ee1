use hickory_resolver::Resolver;
use log::{debug, warn};
use std::collections::HashMap;
use std::net::IpAddr;

pub trait HostnameResolver: Send {
    fn reverse(&mut self, ip: IpAddr) -> Option<String>;
}

/// Reverse DNS through the system resolver configuration.
///
/// The resolver is created on first use; the sync resolver drives its own
/// runtime, so it must only be called from plain threads.
#[derive(Default)]
pub struct DnsHostnameResolver {
    resolver: Option<Resolver>,
    unavailable: bool,
}

impl DnsHostnameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolver(&mut self) -> Option<&Resolver> {
        if self.resolver.is_none() && !self.unavailable {
            match Resolver::from_system_conf() {
                Ok(resolver) => self.resolver = Some(resolver),
                Err(e) => {
                    warn!("Reverse DNS disabled: {e}");
                    self.unavailable = true;
                }
            }
        }
        self.resolver.as_ref()
    }
}

impl HostnameResolver for DnsHostnameResolver {
    fn reverse(&mut self, ip: IpAddr) -> Option<String> {
        let lookup = self.resolver()?.reverse_lookup(ip);
        match lookup {
            Ok(names) => names
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_owned()),
            Err(e) => {
                debug!("Reverse lookup for {ip} failed: {e}");
                None
            }
        }
    }
}

/// Per-ip hostname cache; unresolvable addresses map to their literal form.
pub struct HostnameCache {
    resolver: Box<dyn HostnameResolver>,
    cache: HashMap<IpAddr, String>,
}

impl HostnameCache {
    pub fn new(resolver: Box<dyn HostnameResolver>) -> Self {
        Self {
            resolver,
            cache: HashMap::new(),
        }
    }

    pub fn hostname(&mut self, ip: IpAddr) -> String {
        if let Some(name) = self.cache.get(&ip) {
            return name.clone();
        }
        let name = self
            .resolver
            .reverse(ip)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| ip.to_string());
        self.cache.insert(ip, name.clone());
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: Arc<AtomicUsize>,
    }

    impl HostnameResolver for CountingResolver {
        fn reverse(&mut self, ip: IpAddr) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match ip.to_string().as_str() {
                "93.184.216.34" => Some("example.com".to_owned()),
                _ => None,
            }
        }
    }

    #[test]
    fn test_cache_and_fallback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache = HostnameCache::new(Box::new(CountingResolver {
            calls: calls.clone(),
        }));
        let known: IpAddr = "93.184.216.34".parse().unwrap();
        let unknown: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(cache.hostname(known), "example.com");
        assert_eq!(cache.hostname(known), "example.com");
        assert_eq!(cache.hostname(unknown), "10.1.2.3");
        assert_eq!(cache.hostname(unknown), "10.1.2.3");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
