use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::ResolveErrorKind,
    proto::rr::RecordType,
    TokioAsyncResolver,
};

use super::extractor::fold_text;

const BASE_SUFFIXES: [&str; 2] = [".es", ".com"];

// Regional registries only make sense for companies seated there. Older
// records spell some provinces in Castilian, so both forms are listed.
const CATALAN_PROVINCES: [&str; 8] = [
    "barcelona",
    "tarragona",
    "lleida",
    "lerida",
    "girona",
    "gerona",
    "islas baleares",
    "illes balears",
];
const GALICIAN_PROVINCES: [&str; 7] = [
    "a coruna",
    "la coruna",
    "coruna",
    "lugo",
    "ourense",
    "orense",
    "pontevedra",
];
const BASQUE_PROVINCES: [&str; 8] = [
    "bizkaia",
    "vizcaya",
    "gipuzkoa",
    "guipuzcoa",
    "araba",
    "alava",
    "navarra",
    "nafarroa",
];

const LEGAL_FORMS: [&str; 14] = [
    "sociedad anonima",
    "sociedad limitada",
    "sociedad civil",
    "s a",
    "s l",
    "sa",
    "sl",
    "slu",
    "sll",
    "sau",
    "scp",
    "scl",
    "sc",
    "aie",
];

const GROUP_TOKENS: [&str; 2] = ["grupo", "group"];

/// Lowercases, folds accents, deletes punctuation and strips trailing
/// legal-form suffixes: "Talleres Gómez, S.L." becomes "talleres gomez".
pub fn normalize_company_name(name: &str) -> String {
    let folded = fold_text(name);
    let cleaned: String = folded
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();

    loop {
        let mut stripped = false;
        for form in LEGAL_FORMS {
            let form_tokens: Vec<&str> = form.split(' ').collect();
            if tokens.len() > form_tokens.len() && tokens.ends_with(&form_tokens) {
                tokens.truncate(tokens.len() - form_tokens.len());
                stripped = true;
            }
        }
        if !stripped {
            break;
        }
    }

    tokens.join(" ")
}

/// Name fragments to try as domain labels, most specific first: full name,
/// trailing-word-dropped prefixes, the same without the leading token, and
/// grupo/group variants of the full name.
pub fn base_combinations(normalized: &str) -> Vec<String> {
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut combos: Vec<String> = Vec::new();
    for end in (1..=tokens.len()).rev() {
        combos.push(tokens[..end].concat());
    }
    if tokens.len() > 1 {
        for end in (2..=tokens.len()).rev() {
            combos.push(tokens[1..end].concat());
        }
    }

    let joined = tokens.concat();
    for group in GROUP_TOKENS {
        if tokens.first() == Some(&group) {
            continue;
        }
        combos.push(format!("{}{}", group, joined));
        combos.push(format!("{}{}", joined, group));
    }

    combos.into_iter().filter(|c| !c.is_empty()).unique().collect()
}

pub fn domain_suffixes(province: Option<&str>) -> Vec<&'static str> {
    let mut suffixes: Vec<&'static str> = BASE_SUFFIXES.to_vec();
    if let Some(province) = province {
        let folded = fold_text(province);
        let folded = folded.trim();
        if CATALAN_PROVINCES.contains(&folded) {
            suffixes.push(".cat");
        }
        if GALICIAN_PROVINCES.contains(&folded) {
            suffixes.push(".gal");
        }
        if BASQUE_PROVINCES.contains(&folded) {
            suffixes.push(".eus");
        }
    }
    suffixes
}

/// Full candidate host list, in probe order. Each name/suffix pair is
/// tried bare and with a www prefix.
pub fn candidate_hosts(name: &str, province: Option<&str>) -> Vec<String> {
    let normalized = normalize_company_name(name);
    let suffixes = domain_suffixes(province);

    let mut hosts = Vec::new();
    for combo in base_combinations(&normalized) {
        for suffix in &suffixes {
            let host = format!("{}{}", combo, suffix);
            hosts.push(host.clone());
            hosts.push(format!("www.{}", host));
        }
    }
    hosts.into_iter().unique().collect()
}

#[async_trait]
pub trait ResolveHost: Send + Sync {
    async fn resolves(&self, host: &str) -> bool;
}

pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self { resolver }
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResolveHost for DnsResolver {
    async fn resolves(&self, host: &str) -> bool {
        match self.resolver.lookup(host, RecordType::A).await {
            Ok(lookup) => lookup.iter().next().is_some(),
            // nxdomain means the host does not exist; any other error means the
            // dns client itself is unwell, so fall back to system resolution
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => false,
            Err(_) => tokio::net::lookup_host((host, 443))
                .await
                .map(|mut addrs| addrs.next().is_some())
                .unwrap_or(false),
        }
    }
}

pub struct CandidateGenerator {
    resolver: Arc<dyn ResolveHost>,
}

impl CandidateGenerator {
    pub fn new(resolver: Arc<dyn ResolveHost>) -> Self {
        Self { resolver }
    }

    /// The company's own declared url, normalized to https, probed before
    /// anything generated.
    pub fn declared_candidate(declared_url: Option<&str>) -> Option<String> {
        let declared = declared_url?.trim();
        if declared.is_empty() {
            return None;
        }
        if declared.starts_with("http://") || declared.starts_with("https://") {
            Some(declared.to_string())
        } else {
            Some(format!("https://{}", declared))
        }
    }

    /// Candidate urls for hosts that actually exist in DNS, in probe order.
    pub async fn generate(&self, name: &str, province: Option<&str>) -> Vec<String> {
        let mut candidates = Vec::new();
        for host in candidate_hosts(name, province) {
            if self.resolver.resolves(&host).await {
                candidates.push(format!("https://{}", host));
            }
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    struct FixedResolver {
        known: HashSet<String>,
    }

    impl FixedResolver {
        fn with(hosts: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                known: hosts.iter().map(|h| h.to_string()).collect(),
            })
        }
    }

    #[async_trait]
    impl ResolveHost for FixedResolver {
        async fn resolves(&self, host: &str) -> bool {
            self.known.contains(host)
        }
    }

    #[test]
    fn normalization_folds_and_strips_legal_forms() {
        assert_eq!(
            normalize_company_name("Talleres Gómez, S.L."),
            "talleres gomez"
        );
        assert_eq!(
            normalize_company_name("CONSTRUCCIONES IBÉRICAS SOCIEDAD ANONIMA"),
            "construcciones ibericas"
        );
        assert_eq!(normalize_company_name("Ñoño Patrimonial SLU"), "nono patrimonial");
        // chained suffixes all come off
        assert_eq!(normalize_company_name("Acme SL Unipersonal SA"), "acme sl unipersonal");
    }

    #[test]
    fn normalization_never_eats_the_whole_name() {
        // the name IS a legal form; there is nothing left to strip it from
        assert_eq!(normalize_company_name("SL"), "sl");
    }

    #[test]
    fn combinations_run_longest_first() {
        let combos = base_combinations("acme soluciones digitales");
        let prefix: Vec<&str> = combos.iter().map(String::as_str).take(3).collect();
        assert_eq!(
            prefix,
            vec!["acmesolucionesdigitales", "acmesoluciones", "acme"]
        );
        // the secondary set drops the first token
        assert!(combos.contains(&"solucionesdigitales".to_string()));
        assert!(combos.contains(&"soluciones".to_string()));
        // group variants of the full name
        assert!(combos.contains(&"grupoacmesolucionesdigitales".to_string()));
        assert!(combos.contains(&"acmesolucionesdigitalesgroup".to_string()));
    }

    #[test]
    fn combinations_are_unique() {
        let combos = base_combinations("acme");
        let unique: HashSet<&String> = combos.iter().collect();
        assert_eq!(unique.len(), combos.len());
    }

    #[test]
    fn regional_suffixes_follow_the_province() {
        assert_eq!(domain_suffixes(None), vec![".es", ".com"]);
        assert_eq!(domain_suffixes(Some("Madrid")), vec![".es", ".com"]);
        assert_eq!(domain_suffixes(Some("Barcelona")), vec![".es", ".com", ".cat"]);
        assert_eq!(domain_suffixes(Some("Girona")), vec![".es", ".com", ".cat"]);
        assert_eq!(domain_suffixes(Some("Lérida")), vec![".es", ".com", ".cat"]);
        assert_eq!(domain_suffixes(Some("A Coruña")), vec![".es", ".com", ".gal"]);
        assert_eq!(domain_suffixes(Some("La Coruña")), vec![".es", ".com", ".gal"]);
        assert_eq!(domain_suffixes(Some("Bizkaia")), vec![".es", ".com", ".eus"]);
        assert_eq!(domain_suffixes(Some("Vizcaya")), vec![".es", ".com", ".eus"]);
        assert_eq!(domain_suffixes(Some("Navarra")), vec![".es", ".com", ".eus"]);
    }

    #[test]
    fn hosts_come_bare_and_with_www() {
        let hosts = candidate_hosts("Acme SL", None);
        let expected_head = [
            "acme.es".to_string(),
            "www.acme.es".to_string(),
            "acme.com".to_string(),
            "www.acme.com".to_string(),
        ];
        assert!(hosts.starts_with(&expected_head));
        // group variants come after the plain name
        assert!(hosts.contains(&"grupoacme.es".to_string()));

        let unique: HashSet<&String> = hosts.iter().collect();
        assert_eq!(unique.len(), hosts.len());
    }

    #[test]
    fn catalan_companies_get_cat_hosts() {
        let hosts = candidate_hosts("Acme Soluciones S.L.", Some("Barcelona"));
        assert!(hosts.contains(&"acmesoluciones.cat".to_string()));
        assert!(hosts.contains(&"www.acmesoluciones.cat".to_string()));
        // the legal form never leaks into a host
        assert!(hosts.iter().all(|h| !h.contains("sl")));
    }

    #[test]
    fn declared_url_gets_a_scheme_when_missing() {
        assert_eq!(
            CandidateGenerator::declared_candidate(Some("acme.es")).as_deref(),
            Some("https://acme.es")
        );
        assert_eq!(
            CandidateGenerator::declared_candidate(Some("http://acme.es")).as_deref(),
            Some("http://acme.es")
        );
        assert_eq!(CandidateGenerator::declared_candidate(Some("   ")), None);
        assert_eq!(CandidateGenerator::declared_candidate(None), None);
    }

    #[tokio::test]
    async fn only_resolving_hosts_become_candidates() {
        let generator =
            CandidateGenerator::new(FixedResolver::with(&["acme.es", "www.acme.com"]));
        let candidates = generator.generate("Acme SL", None).await;
        assert_eq!(
            candidates,
            vec!["https://acme.es", "https://www.acme.com"]
        );
    }

    #[tokio::test]
    async fn empty_names_generate_nothing() {
        let generator = CandidateGenerator::new(FixedResolver::with(&[]));
        assert!(generator.generate("  ", None).await.is_empty());
    }
}
