//! WHOIS lookups over TCP port 43 and normalisation of the free-form reply.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::WhoisSettings;

const WHOIS_PORT: u16 = 43;
const MAX_REFERRALS: usize = 2;
const MAX_REPLY_BYTES: u64 = 256 * 1024;

/// Public suffixes registered at the third level (`shop.com.tn`).
const SECOND_LEVEL_SUFFIXES: &[&str] = &[
    "com.tn", "org.tn", "net.tn", "gov.tn", "edu.tn", "ens.tn", "fin.tn", "ind.tn", "info.tn",
    "intl.tn", "nat.tn", "tourism.tn", "agrinet.tn", "co.uk", "org.uk", "com.fr", "com.au",
];

#[derive(Debug, Error)]
pub enum WhoisError {
    #[error("invalid domain '{0}'")]
    InvalidDomain(String),
    #[error("could not reach WHOIS server {server}: {source}")]
    Connect {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("WHOIS server {server} did not answer within {seconds}s")]
    Timeout { server: String, seconds: u64 },
    #[error("I/O error talking to {server}: {source}")]
    Io {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no WHOIS data returned for {0}")]
    NoData(String),
}

/// A parsed WHOIS reply. Field keys are normalised snake_case
/// (`domain_name`, `registrar`, `creation_date`, `registrant_email`, ...);
/// repeated keys become arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct WhoisRecord {
    pub domain: String,
    pub server: String,
    pub fields: Map<String, JsonValue>,
}

impl WhoisRecord {
    pub fn parse(domain: &str, server: &str, raw: &str) -> Self {
        let mut fields = Map::new();

        for line in raw.lines() {
            let line = line.trim();
            if line.starts_with(">>>") || line.starts_with("NOTICE:") || line.starts_with("TERMS OF USE:") {
                break;
            }
            if line.is_empty() || line.starts_with('%') || line.starts_with('#') {
                continue;
            }
            let Some((raw_key, raw_value)) = line.split_once(':') else { continue };
            let value = raw_value.trim();
            if value.is_empty() || value.starts_with("//") {
                continue;
            }
            let raw_key = raw_key.trim().trim_end_matches(['.', ' ']);
            if raw_key.is_empty() || raw_key.len() > 48 {
                continue;
            }
            let key = normalize_key(raw_key);
            insert_field(&mut fields, key, value);
        }

        Self {
            domain: domain.to_string(),
            server: server.to_string(),
            fields,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.keys().all(|k| k == "refer")
    }

    /// Field rendered as text; arrays are joined with ", ".
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.fields.get(key).map(display_value)
    }

    pub fn referral(&self) -> Option<String> {
        ["refer", "whois_server"]
            .iter()
            .find_map(|key| self.get_str(key))
            .map(|s| s.split(", ").next().unwrap_or_default().trim().to_lowercase())
            .filter(|s| !s.is_empty())
    }

    pub fn into_json(self) -> Map<String, JsonValue> {
        self.fields
    }
}

pub fn display_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(items) => items.iter().map(display_value).collect::<Vec<_>>().join(", "),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn insert_field(fields: &mut Map<String, JsonValue>, key: String, value: &str) {
    let value = if key == "name_servers" { value.to_lowercase() } else { value.to_string() };
    match fields.get_mut(&key) {
        None if key == "name_servers" => {
            fields.insert(key, JsonValue::Array(vec![JsonValue::String(value)]));
        }
        None => {
            fields.insert(key, JsonValue::String(value));
        }
        Some(JsonValue::Array(items)) => {
            if !items.iter().any(|v| v.as_str() == Some(value.as_str())) {
                items.push(JsonValue::String(value));
            }
        }
        Some(existing) => {
            if existing.as_str() != Some(value.as_str()) {
                let first = existing.take();
                *existing = JsonValue::Array(vec![first, JsonValue::String(value)]);
            }
        }
    }
}

fn snake_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

fn normalize_key(raw_key: &str) -> String {
    let key = snake_case(raw_key);

    for (prefix, contact) in [
        ("registrant_contact_", "registrant"),
        ("registrant_", "registrant"),
        ("owner_contact_", "registrant"),
        ("owner_", "registrant"),
        ("administrative_contact_", "admin"),
        ("admin_contact_", "admin"),
        ("admin_", "admin"),
        ("technical_contact_", "tech"),
        ("tech_contact_", "tech"),
        ("tech_", "tech"),
    ] {
        if let Some(rest) = key.strip_prefix(prefix) {
            return format!("{contact}_{}", contact_field(rest));
        }
    }

    match key.as_str() {
        "domain" | "domain_name" => "domain_name",
        "registrar" | "sponsoring_registrar" | "registrar_name" => "registrar",
        "registrar_url" => "registrar_url",
        "registrar_iana_id" => "registrar_iana_id",
        "whois" | "whois_server" | "registrar_whois_server" => "whois_server",
        "creation_date" | "created" | "created_on" | "registered_on" | "registration_date" => {
            "creation_date"
        }
        "updated_date" | "last_updated" | "changed" | "last_modified" | "updated" => "updated_date",
        "registry_expiry_date"
        | "registrar_registration_expiration_date"
        | "expiration_date"
        | "expiry_date"
        | "expires"
        | "expires_on"
        | "paid_till" => "expiration_date",
        "name_server" | "name_servers" | "nserver" | "nameserver" | "nameservers" | "dns" => {
            "name_servers"
        }
        "domain_status" | "status" => "status",
        "dnssec" => "dnssec",
        _ => return key,
    }
    .to_string()
}

fn contact_field(rest: &str) -> &str {
    match rest {
        "organisation" | "org" | "organization" => "organization",
        "street" | "address" | "street_address" => "address",
        "state_province" | "state" | "province" => "state",
        "postal_code" | "zip" | "zip_code" | "zipcode" => "zipcode",
        "e_mail" | "email" | "mail" => "email",
        "phone" | "tel" | "telephone" => "phone",
        "fax" | "fax_no" => "fax",
        "first_name" | "firstname" => "first_name",
        other => other,
    }
}

/// Registrable domain for a host: `www.shop.com.tn` -> `shop.com.tn`, `a.b.tn` -> `b.tn`.
pub fn registered_domain(host: &str) -> Option<String> {
    let host = host.trim().trim_end_matches('.').to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 || labels.iter().any(|l| !l.chars().all(|c| c.is_alphanumeric() || c == '-')) {
        return None;
    }
    // IPv4 literals have no registrant.
    if labels.iter().all(|l| l.chars().all(|c| c.is_ascii_digit())) {
        return None;
    }
    let last_two = labels[labels.len() - 2..].join(".");
    let keep = if SECOND_LEVEL_SUFFIXES.contains(&last_two.as_str()) && labels.len() >= 3 { 3 } else { 2 };
    Some(labels[labels.len() - keep..].join("."))
}

/// Registrable domain of a URL's host.
pub fn domain_of_url(raw: &str) -> Option<String> {
    let url = url::Url::parse(raw).ok()?;
    registered_domain(url.host_str()?)
}

/// Domain to query for user input that may be a bare domain, a URL or a
/// `host/path` without scheme. Unusable input is returned trimmed so the
/// lookup can report it.
pub fn lookup_target(input: &str) -> String {
    let input = input.trim();
    let parsed = if input.contains("://") {
        domain_of_url(input)
    } else if input.contains(['/', '?', '#', ':']) {
        domain_of_url(&format!("http://{input}"))
    } else {
        registered_domain(input)
    };
    parsed.unwrap_or_else(|| input.to_string())
}

#[derive(Debug, Clone)]
pub struct WhoisClient {
    server: String,
    timeout: Duration,
}

impl WhoisClient {
    pub fn new(settings: &WhoisSettings) -> Self {
        Self {
            server: settings.server.clone(),
            timeout: Duration::from_secs(settings.timeout),
        }
    }

    /// Query the root server and follow referrals to the registry / registrar.
    pub async fn lookup(&self, domain: &str) -> Result<WhoisRecord, WhoisError> {
        let domain = registered_domain(domain).ok_or_else(|| WhoisError::InvalidDomain(domain.to_string()))?;

        info!("WHOIS lookup for {} via {}", domain, self.server);
        let raw = self.query(&self.server, &domain).await?;
        let mut record = WhoisRecord::parse(&domain, &self.server, &raw);

        for _ in 0..MAX_REFERRALS {
            let Some(referral) = record.referral() else { break };
            let server = with_port(&referral);
            if server.eq_ignore_ascii_case(&record.server) {
                break;
            }
            debug!("Following WHOIS referral to {}", server);
            match self.query(&server, &domain).await {
                Ok(raw) => {
                    let next = WhoisRecord::parse(&domain, &server, &raw);
                    if next.is_empty() {
                        break;
                    }
                    record = next;
                }
                Err(e) => {
                    warn!("WHOIS referral to {} failed: {}", server, e);
                    break;
                }
            }
        }

        if record.is_empty() {
            return Err(WhoisError::NoData(domain));
        }
        Ok(record)
    }

    async fn query(&self, server: &str, domain: &str) -> Result<String, WhoisError> {
        let seconds = self.timeout.as_secs();
        let exchange = async {
            let mut stream = TcpStream::connect(server)
                .await
                .map_err(|source| WhoisError::Connect { server: server.to_string(), source })?;
            stream
                .write_all(format!("{domain}\r\n").as_bytes())
                .await
                .map_err(|source| WhoisError::Io { server: server.to_string(), source })?;

            let mut buf = Vec::new();
            (&mut stream)
                .take(MAX_REPLY_BYTES)
                .read_to_end(&mut buf)
                .await
                .map_err(|source| WhoisError::Io { server: server.to_string(), source })?;
            Ok::<_, WhoisError>(String::from_utf8_lossy(&buf).into_owned())
        };

        timeout(self.timeout, exchange)
            .await
            .map_err(|_| WhoisError::Timeout { server: server.to_string(), seconds })?
    }
}

fn with_port(server: &str) -> String {
    if server.contains(':') { server.to_string() } else { format!("{server}:{WHOIS_PORT}") }
}

pub fn parse_whois_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.split(", ").next().unwrap_or(raw).trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    let head = raw.split_whitespace().next().unwrap_or(raw);
    let head = head.split('T').next().unwrap_or(head);
    ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%d-%b-%Y", "%Y.%m.%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(head, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

const PRIVACY_MARKERS: &[&str] = &["privacy", "whois", "protected", "redacted", "anonymous", "proxy"];
const DISPOSABLE_MAIL_MARKERS: &[&str] = &[
    "tempmail", "10minutemail", "guerrillamail", "throwaway", "temp-mail", "mailtemp", "disposable",
];

/// Registration traits that often accompany throwaway shop domains.
pub fn suspicious_patterns(fields: &Map<String, JsonValue>, now: DateTime<Utc>) -> Vec<String> {
    let text = |key: &str| fields.get(key).map(display_value).unwrap_or_default();
    let mut patterns = Vec::new();

    if let Some(created) = fields.get("creation_date").map(display_value).and_then(|d| parse_whois_date(&d))
        && now.signed_duration_since(created) < chrono::Duration::days(365)
    {
        patterns.push("Domaine récemment enregistré (moins d'un an)".to_string());
    }

    let registrant_name = text("registrant_name").to_lowercase();
    let registrant_org = text("registrant_organization").to_lowercase();
    let registrant_email = text("registrant_email").to_lowercase();

    if PRIVACY_MARKERS.iter().any(|m| {
        registrant_name.contains(m) || registrant_org.contains(m) || registrant_email.contains(m)
    }) {
        patterns.push("Protection de la vie privée détectée (peut cacher l'identité réelle)".to_string());
    }

    if let Some((_, mail_domain)) = registrant_email.rsplit_once('@')
        && DISPOSABLE_MAIL_MARKERS.iter().any(|m| mail_domain.contains(m))
    {
        patterns.push("Adresse email temporaire détectée".to_string());
    }

    let missing: Vec<&str> = ["registrant_name", "registrant_email", "registrant_country"]
        .into_iter()
        .filter(|key| {
            let v = text(key).trim().to_lowercase();
            v.is_empty() || v == "n/a" || v == "not provided"
        })
        .collect();
    if !missing.is_empty() {
        patterns.push(format!("Informations de contact incomplètes: {}", missing.join(", ")));
    }

    let registrar = text("registrar").to_lowercase();
    if ["unknown", "unavailable", "not specified"].iter().any(|m| registrar.contains(m)) {
        patterns.push("Registrar non spécifié ou inconnu".to_string());
    }

    let status = text("status").to_lowercase();
    if ["suspended", "inactive", "pending", "locked"].iter().any(|m| status.contains(m)) {
        patterns.push(format!("Statut de domaine problématique: {status}"));
    }

    let domain_name = text("domain_name").to_lowercase();
    if !domain_name.is_empty() {
        let stem = domain_name.replace(".tn", "").replace(".com", "").replace(".net", "");
        if stem.chars().count() < 5 {
            patterns.push("Nom de domaine très court (souvent utilisé pour le phishing)".to_string());
        }
    }

    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    const REGISTRY_REPLY: &str = "\
Domain Name: BOUTIQUE-PROMO.TN
Registrar: Example Registrar SARL
Registrar URL: http://registrar.example
Creation Date: 2024-03-01T10:00:00Z
Registry Expiry Date: 2025-03-01T10:00:00Z
Name Server: NS1.HOST.TN
Name Server: NS2.HOST.TN
Domain Status: clientTransferProhibited
Domain Status: pendingDelete
Registrant Name: REDACTED FOR PRIVACY
Registrant Email: shop@tempmail.io
>>> Last update of WHOIS database: 2024-06-01T00:00:00Z <<<
Registrant Country: TN
";

    async fn serve_once(reply: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = tokio::io::BufReader::new(socket);
            let mut query = String::new();
            reader.read_line(&mut query).await.unwrap();
            reader.get_mut().write_all(reply.as_bytes()).await.unwrap();
            query
        });
        (addr, handle)
    }

    #[test]
    fn parses_and_normalizes_fields() {
        let record = WhoisRecord::parse("boutique-promo.tn", "test:43", REGISTRY_REPLY);
        assert_eq!(record.get_str("domain_name").as_deref(), Some("BOUTIQUE-PROMO.TN"));
        assert_eq!(record.get_str("registrar_url").as_deref(), Some("http://registrar.example"));
        assert_eq!(record.get_str("expiration_date").as_deref(), Some("2025-03-01T10:00:00Z"));
        assert_eq!(
            record.fields["name_servers"],
            serde_json::json!(["ns1.host.tn", "ns2.host.tn"])
        );
        assert_eq!(
            record.get_str("status").as_deref(),
            Some("clientTransferProhibited, pendingDelete")
        );
        assert_eq!(record.get_str("registrant_email").as_deref(), Some("shop@tempmail.io"));
        // parsing stops at the database timestamp footer
        assert!(record.get_str("registrant_country").is_none());
    }

    #[test]
    fn dotted_keys_of_ati_format() {
        let raw = "Domain name.........: exemple.com.tn\nCreation date.......: 06-05-2010 00:00:00 GMT+1\nOwner Name..........: Société X\n";
        let record = WhoisRecord::parse("exemple.com.tn", "whois.ati.tn:43", raw);
        assert_eq!(record.get_str("domain_name").as_deref(), Some("exemple.com.tn"));
        assert_eq!(record.get_str("registrant_name").as_deref(), Some("Société X"));
        let created = parse_whois_date(&record.get_str("creation_date").unwrap()).unwrap();
        assert_eq!(created, Utc.with_ymd_and_hms(2010, 5, 6, 0, 0, 0).unwrap());
    }

    #[test]
    fn registered_domain_handles_second_level_suffixes() {
        assert_eq!(registered_domain("www.shop.com.tn").as_deref(), Some("shop.com.tn"));
        assert_eq!(registered_domain("m.boutique.tn").as_deref(), Some("boutique.tn"));
        assert_eq!(registered_domain("Example.COM.").as_deref(), Some("example.com"));
        assert_eq!(registered_domain("localhost"), None);
        assert_eq!(registered_domain("127.0.0.1"), None);
        assert_eq!(domain_of_url("https://www.jumia.com.tn/p?x=1").as_deref(), Some("jumia.com.tn"));
    }

    #[test]
    fn lookup_target_accepts_urls() {
        assert_eq!(lookup_target("https://www.shop.com.tn/produit/42?ref=ad"), "shop.com.tn");
        assert_eq!(lookup_target("boutique.tn/promo"), "boutique.tn");
        assert_eq!(lookup_target("boutique.tn:8080"), "boutique.tn");
        assert_eq!(lookup_target(" m.Boutique.tn "), "boutique.tn");
        assert_eq!(lookup_target("localhost"), "localhost");
    }

    #[test]
    fn flags_suspicious_registration_traits() {
        let record = WhoisRecord::parse("boutique-promo.tn", "test:43", REGISTRY_REPLY);
        let now = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
        let patterns = suspicious_patterns(&record.fields, now);
        assert!(patterns.iter().any(|p| p.starts_with("Domaine récemment enregistré")));
        assert!(patterns.iter().any(|p| p.starts_with("Protection de la vie privée")));
        assert!(patterns.iter().any(|p| p == "Adresse email temporaire détectée"));
        assert!(patterns.iter().any(|p| p == "Informations de contact incomplètes: registrant_country"));
        assert!(patterns.iter().any(|p| p.starts_with("Statut de domaine problématique")));
        assert!(!patterns.iter().any(|p| p.starts_with("Nom de domaine très court")));
    }

    #[test]
    fn old_complete_registration_is_clean() {
        let mut fields = Map::new();
        for (k, v) in [
            ("domain_name", "grandmagasin.tn"),
            ("creation_date", "2005-01-01"),
            ("registrar", "ATI"),
            ("registrant_name", "Grand Magasin SA"),
            ("registrant_email", "contact@grandmagasin.tn"),
            ("registrant_country", "TN"),
        ] {
            fields.insert(k.to_string(), JsonValue::String(v.to_string()));
        }
        let now = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
        assert!(suspicious_patterns(&fields, now).is_empty());
    }

    #[tokio::test]
    async fn lookup_follows_referral() {
        let (registry, registry_task) = serve_once(REGISTRY_REPLY.to_string()).await;
        let (root, root_task) =
            serve_once(format!("% IANA WHOIS server\nrefer:        {registry}\n\ndomain: TN\n")).await;

        let client = WhoisClient::new(&WhoisSettings { server: root, timeout: 5 });
        let record = client.lookup("www.boutique-promo.tn").await.unwrap();

        assert_eq!(record.server, registry);
        assert_eq!(record.get_str("registrar").as_deref(), Some("Example Registrar SARL"));
        assert_eq!(root_task.await.unwrap(), "boutique-promo.tn\r\n");
        assert_eq!(registry_task.await.unwrap(), "boutique-promo.tn\r\n");
    }

    #[tokio::test]
    async fn empty_reply_is_no_data() {
        let (server, _task) = serve_once("% nothing here\n".to_string()).await;
        let client = WhoisClient::new(&WhoisSettings { server, timeout: 5 });
        assert!(matches!(client.lookup("inconnu.tn").await, Err(WhoisError::NoData(_))));
    }

    #[tokio::test]
    async fn rejects_invalid_domain() {
        let client = WhoisClient::new(&WhoisSettings { server: "127.0.0.1:1".into(), timeout: 1 });
        assert!(matches!(client.lookup("not a domain").await, Err(WhoisError::InvalidDomain(_))));
    }
}
