//! Static domain policy. The tables exist for safety only — they gate
//! confirmation, they never steer the agent toward or away from a site.

use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainSecurityLevel {
    /// Ordinary domain, no extra gate.
    Safe,
    /// Any action requires user confirmation regardless of keyword analysis.
    Critical,
    /// Admin panels and system pages the agent must not touch.
    Blocked,
}

#[derive(Debug, Clone)]
pub struct DomainSecurity {
    pub level: DomainSecurityLevel,
    pub description: String,
    pub reason: String,
}

/// Financial, government and payment services: always confirm.
const CRITICAL_DOMAINS: &[(&str, &str)] = &[
    // Banks
    ("sberbank.ru", "Банковские операции"),
    ("alfabank.ru", "Банковские операции"),
    ("vtb.ru", "Банковские операции"),
    ("tinkoff.ru", "Банковские операции"),
    ("bankofamerica.com", "Banking operations"),
    ("chase.com", "Banking operations"),
    ("wellsfargo.com", "Banking operations"),
    ("citibank.com", "Banking operations"),
    // Payment processors
    ("paypal.com", "Payment processing"),
    ("stripe.com", "Payment processing"),
    ("square.com", "Payment processing"),
    ("venmo.com", "Payment processing"),
    ("money.yandex.ru", "Платежная система"),
    ("qiwi.com", "Платежная система"),
    // Crypto exchanges
    ("binance.com", "Cryptocurrency exchange"),
    ("coinbase.com", "Cryptocurrency exchange"),
    ("kraken.com", "Cryptocurrency exchange"),
    // Government services
    ("gosuslugi.ru", "Государственные услуги"),
    ("nalog.gov.ru", "Налоговая служба"),
    ("irs.gov", "Tax services"),
];

const BLOCKED_PATTERNS: &[&str] = &[
    "/admin",
    "/administrator",
    "/wp-admin",
    "/phpmyadmin",
    "/cpanel",
];

fn is_private_host(host: &str) -> bool {
    if host.contains("localhost") || host.starts_with("127.") || host.starts_with("192.168.") {
        return true;
    }
    if host.starts_with("10.") {
        return true;
    }
    // 172.16.0.0/12
    if let Some(rest) = host.strip_prefix("172.") {
        if let Some(second) = rest.split('.').next() {
            if let Ok(octet) = second.parse::<u8>() {
                return (16..=31).contains(&octet);
            }
        }
    }
    false
}

/// Classify a URL against the policy tables. Unparseable URLs come back
/// safe — the navigation itself will fail before anything dangerous runs.
pub fn check_domain_security(url_str: &str) -> DomainSecurity {
    let parsed = match Url::parse(url_str) {
        Ok(parsed) => parsed,
        Err(_) => {
            return DomainSecurity {
                level: DomainSecurityLevel::Safe,
                description: "failed to parse URL".to_string(),
                reason: String::new(),
            }
        }
    };

    let host = parsed.host_str().unwrap_or("").to_lowercase();
    let path = parsed.path().to_lowercase();

    for pattern in BLOCKED_PATTERNS {
        if path.contains(pattern) || host.contains(pattern) {
            return DomainSecurity {
                level: DomainSecurityLevel::Blocked,
                description: "Заблокированный URL (админ-панель или системная страница)".to_string(),
                reason: format!("Обнаружен паттерн: {}", pattern),
            };
        }
    }

    for (domain, description) in CRITICAL_DOMAINS {
        if host == *domain || host.ends_with(&format!(".{}", domain)) {
            return DomainSecurity {
                level: DomainSecurityLevel::Critical,
                description: description.to_string(),
                reason: "Критичный домен, требует подтверждения пользователя".to_string(),
            };
        }
    }

    if is_private_host(&host) {
        return DomainSecurity {
            level: DomainSecurityLevel::Critical,
            description: "Локальный адрес".to_string(),
            reason: "Операции на локальных адресах требуют подтверждения".to_string(),
        };
    }

    DomainSecurity {
        level: DomainSecurityLevel::Safe,
        description: "Обычный домен".to_string(),
        reason: String::new(),
    }
}

#[allow(dead_code)]
pub fn is_domain_blocked(url_str: &str) -> bool {
    check_domain_security(url_str).level == DomainSecurityLevel::Blocked
}

#[allow(dead_code)]
pub fn is_domain_critical(url_str: &str) -> bool {
    check_domain_security(url_str).level == DomainSecurityLevel::Critical
}
