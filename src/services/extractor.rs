use std::sync::LazyLock;

use itertools::Itertools;
use regex::Regex;
use scraper::{Html, Selector};

use crate::domain::company::SocialLinks;

pub const MAX_PHONES: usize = 3;
pub const ECOMMERCE_THRESHOLD: u32 = 5;

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\+34|0034)?[\s.\-]?[6789](?:[\s.\-]?\d){8}").unwrap());
static PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+[.,]\d{2}\s*(?:€|eur(?:os)?\b)|€\s*\d+").unwrap());

const SOCIAL_SHARE_MARKERS: [&str; 5] = ["sharer", "/share", "share?", "intent/", "share.php"];

const CART_VOCAB: [&str; 4] = ["cart", "carrito", "cesta", "basket"];
const BUY_VOCAB: [&str; 4] = ["comprar", "buy", "anadir al carrito", "add to cart"];
const CHECKOUT_VOCAB: [&str; 4] = ["checkout", "finalizar compra", "tramitar pedido", "pagar"];
const SHOP_VOCAB: [&str; 4] = ["tienda", "shop", "store", "catalogo"];
const PLATFORM_MARKERS: [&str; 5] = [
    "woocommerce",
    "shopify",
    "prestashop",
    "magento",
    "add-to-cart",
];

/// Everything the pipeline needs from one fetched page. Parsing happens
/// once here; scoring reads the extract and never touches the html again.
pub struct PageExtract {
    pub title: String,
    pub meta_description: String,
    pub headings: Vec<String>,
    /// Whole-page visible text, diacritic-folded and lowercased.
    pub text: String,
    pub phones: Vec<String>,
    pub social_links: SocialLinks,
    pub ecommerce_score: u32,
    pub has_contact_page: bool,
}

impl PageExtract {
    pub fn has_ecommerce(&self) -> bool {
        self.ecommerce_score >= ECOMMERCE_THRESHOLD
    }
}

pub fn extract_page(html: &str) -> PageExtract {
    let document = Html::parse_document(html);

    let title_selector = Selector::parse("title").unwrap();
    let title = document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let meta_selector = Selector::parse("meta").unwrap();
    let meta_description = document
        .select(&meta_selector)
        .find(|element| {
            element
                .value()
                .attr("name")
                .map(|name| name.eq_ignore_ascii_case("description"))
                .unwrap_or(false)
        })
        .and_then(|element| element.value().attr("content"))
        .map(|content| content.trim().to_string())
        .unwrap_or_default();

    let heading_selector = Selector::parse("h1, h2, h3").unwrap();
    let headings: Vec<String> = document
        .select(&heading_selector)
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|heading| !heading.is_empty())
        .collect();

    let text = fold_text(&visible_text(&document));

    PageExtract {
        phones: extract_phones(&document, &text),
        social_links: extract_social_links(&document),
        ecommerce_score: ecommerce_score(&document, &text),
        has_contact_page: has_contact_indicator(&document),
        title,
        meta_description,
        headings,
        text,
    }
}

/// Maps accented vowels and n-tilde to their bare letters and lowercases,
/// so "Construcción" and "construccion" compare equal.
pub fn fold_text(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' | 'Á' | 'À' | 'Ä' | 'Â' => 'a',
            'é' | 'è' | 'ë' | 'ê' | 'É' | 'È' | 'Ë' | 'Ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' | 'Í' | 'Ì' | 'Ï' | 'Î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' | 'Ó' | 'Ò' | 'Ö' | 'Ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' | 'Ú' | 'Ù' | 'Ü' | 'Û' => 'u',
            'ñ' | 'Ñ' => 'n',
            'ç' | 'Ç' => 'c',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

fn visible_text(document: &Html) -> String {
    let body_selector = Selector::parse("body").unwrap();
    match document.select(&body_selector).next() {
        Some(body) => body.text().collect::<Vec<_>>().join(" "),
        None => document.root_element().text().collect::<Vec<_>>().join(" "),
    }
}

/// Spanish subscriber numbers: nine digits starting 6, 7, 8 or 9 once the
/// +34 / 0034 country prefix and separators are stripped.
fn normalize_spanish_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let digits = if let Some(rest) = digits.strip_prefix("0034") {
        rest.to_string()
    } else if digits.len() == 11 && digits.starts_with("34") {
        digits[2..].to_string()
    } else {
        digits
    };

    let starts_valid = matches!(digits.as_bytes().first(), Some(b'6' | b'7' | b'8' | b'9'));
    (digits.len() == 9 && starts_valid).then_some(digits)
}

fn phones_in_text(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut phones = Vec::new();
    for found in PHONE_RE.find_iter(text) {
        // a nine-digit slice of a longer number is not a phone
        let digit_before = found.start() > 0 && bytes[found.start() - 1].is_ascii_digit();
        let digit_after = found.end() < bytes.len() && bytes[found.end()].is_ascii_digit();
        if digit_before || digit_after {
            continue;
        }
        if let Some(phone) = normalize_spanish_phone(found.as_str()) {
            phones.push(phone);
        }
    }
    phones
}

fn extract_phones(document: &Html, folded_text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    // tel: links are the most reliable source
    let link_selector = Selector::parse("a[href]").unwrap();
    for element in document.select(&link_selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if let Some(prefix) = href.get(..4) {
            if prefix.eq_ignore_ascii_case("tel:") {
                if let Some(phone) = normalize_spanish_phone(&href[4..]) {
                    found.push(phone);
                }
            }
        }
    }

    found.extend(phones_in_text(folded_text));

    let data_selector = Selector::parse("[data-phone], [data-telefono], [data-tel]").unwrap();
    for element in document.select(&data_selector) {
        for attr in ["data-phone", "data-telefono", "data-tel"] {
            if let Some(value) = element.value().attr(attr) {
                if let Some(phone) = normalize_spanish_phone(value) {
                    found.push(phone);
                }
            }
        }
    }

    found.into_iter().unique().take(MAX_PHONES).collect()
}

fn link_host(href: &str) -> Option<String> {
    let absolute = if let Some(rest) = href.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        href.to_string()
    };
    url::Url::parse(&absolute)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|host| host.to_lowercase()))
}

fn host_is(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

fn extract_social_links(document: &Html) -> SocialLinks {
    let link_selector = Selector::parse("a[href]").unwrap();
    let mut links = SocialLinks::default();

    for element in document.select(&link_selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let lowered = href.to_lowercase();
        if SOCIAL_SHARE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            continue;
        }
        let Some(host) = link_host(href) else {
            continue;
        };

        if links.facebook.is_none() && host_is(&host, "facebook.com") {
            links.facebook = Some(href.to_string());
        } else if links.twitter.is_none()
            && (host_is(&host, "twitter.com") || host_is(&host, "x.com"))
        {
            links.twitter = Some(href.to_string());
        } else if links.linkedin.is_none() && host_is(&host, "linkedin.com") {
            links.linkedin = Some(href.to_string());
        } else if links.instagram.is_none() && host_is(&host, "instagram.com") {
            links.instagram = Some(href.to_string());
        } else if links.youtube.is_none()
            && (host_is(&host, "youtube.com") || host_is(&host, "youtu.be"))
        {
            links.youtube = Some(href.to_string());
        }
    }
    links
}

fn ecommerce_score(document: &Html, folded_text: &str) -> u32 {
    let mut score = 0u32;

    let link_selector = Selector::parse("a[href]").unwrap();
    let links: Vec<String> = document
        .select(&link_selector)
        .map(|element| {
            let href = element.value().attr("href").unwrap_or("");
            let text: String = element.text().collect();
            fold_text(&format!("{} {}", href, text))
        })
        .collect();

    for vocab in [
        &CART_VOCAB[..],
        &BUY_VOCAB[..],
        &CHECKOUT_VOCAB[..],
        &SHOP_VOCAB[..],
    ] {
        let hit = links
            .iter()
            .any(|link| vocab.iter().any(|term| link.contains(term)));
        if hit {
            score += 1;
        }
    }

    let form_selector = Selector::parse("form").unwrap();
    let purchase_form = document.select(&form_selector).any(|form| {
        let action = form.value().attr("action").unwrap_or("").to_lowercase();
        let class = form.value().attr("class").unwrap_or("").to_lowercase();
        ["cart", "checkout", "comprar", "buy"]
            .iter()
            .any(|term| action.contains(term) || class.contains(term))
    });
    if purchase_form {
        score += 2;
    }

    let class_selector = Selector::parse("[class]").unwrap();
    let platform_class = document.select(&class_selector).any(|element| {
        let class = element.value().attr("class").unwrap_or("").to_lowercase();
        PLATFORM_MARKERS.iter().any(|marker| class.contains(marker))
    });
    let generator_selector = Selector::parse("meta[name=generator]").unwrap();
    let platform_meta = document.select(&generator_selector).any(|element| {
        let content = element.value().attr("content").unwrap_or("").to_lowercase();
        PLATFORM_MARKERS.iter().any(|marker| content.contains(marker))
    });
    if platform_class || platform_meta {
        score += 1;
    }

    if PRICE_RE.is_match(folded_text) {
        score += 2;
    }

    score
}

fn has_contact_indicator(document: &Html) -> bool {
    let link_selector = Selector::parse("a[href]").unwrap();
    document.select(&link_selector).any(|element| {
        let href = fold_text(element.value().attr("href").unwrap_or(""));
        let text = fold_text(&element.text().collect::<String>());
        href.contains("contact") || text.contains("contact")
    })
}
