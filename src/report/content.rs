use chrono::NaiveDateTime;
use serde_json::{Map, Value as JsonValue};

use crate::types::{DisplayResult, ExtractedProduct};
use crate::whois::{display_value, suspicious_patterns};

use super::{Block, Document, TableStyle};

pub const HIGH_RISK_SCORE: u32 = 70;
const SIGNATURE_LINE: &str = "__________________________";
const VALIDITY: &str = "30 jours à compter de la génération";

const GENERAL: &str = "Informations Générales";
const OWNER: &str = "Coordonnées du Propriétaire";
const DNS: &str = "Serveurs de Noms (DNS)";
const DATES: &str = "Dates Importantes";
const TECHNICAL: &str = "Informations Techniques";

fn plain_label(key: &str) -> Option<&'static str> {
    Some(match key {
        "domain_name" => "Nom de domaine",
        "registrar" => "Registrar",
        "registrar_url" => "URL du Registrar",
        "registrar_iana_id" => "ID IANA du Registrar",
        "whois_server" => "Serveur WHOIS",
        "referral_url" => "URL de référence",
        "name_servers" => "Serveurs de noms",
        "creation_date" => "Date de création",
        "updated_date" => "Date de mise à jour",
        "expiration_date" => "Date d'expiration",
        "dnssec" => "DNSSEC",
        "status" => "Statut",
        _ => return None,
    })
}

fn contact_field_label(field: &str) -> Option<&'static str> {
    Some(match field {
        "name" => "Nom",
        "first_name" => "Prénom",
        "organization" => "Organisation",
        "address" => "Adresse",
        "city" => "Ville",
        "state" => "État/Région",
        "zipcode" => "Code postal",
        "country" => "Pays",
        "phone" => "Téléphone",
        "fax" => "Fax",
        "email" => "Email",
        _ => return None,
    })
}

const CONTACTS: [(&str, &str); 3] = [
    ("registrant", "Titulaire"),
    ("admin", "Contact administratif"),
    ("tech", "Contact technique"),
];

fn split_contact(key: &str) -> Option<(&'static str, &str)> {
    CONTACTS.iter().find_map(|(prefix, who)| {
        key.strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('_'))
            .map(|field| (*who, field))
    })
}

/// "snake_case" to "Snake Case".
fn title_case(key: &str) -> String {
    key.split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// French display name of a normalised WHOIS key.
pub fn field_label(key: &str) -> String {
    if let Some(label) = plain_label(key) {
        return label.to_string();
    }
    if let Some((who, field)) = split_contact(key) {
        let field = contact_field_label(field).map(str::to_string).unwrap_or_else(|| title_case(field));
        return format!("{field} ({who})");
    }
    title_case(key)
}

fn section_of(key: &str) -> &'static str {
    match key {
        "domain_name" | "registrar" | "registrar_url" | "registrar_iana_id" | "whois_server" | "referral_url"
        | "refer" => GENERAL,
        "name_servers" => DNS,
        "creation_date" | "updated_date" | "expiration_date" => DATES,
        _ if split_contact(key).is_some() => OWNER,
        _ => TECHNICAL,
    }
}

fn format_value(value: &JsonValue) -> String {
    let text = display_value(value);
    if text.trim().is_empty() { "Non disponible".to_string() } else { text }
}

/// WHOIS fields grouped by report section, empty sections left out.
pub fn organize_whois(fields: &Map<String, JsonValue>) -> Vec<(&'static str, Vec<(String, String)>)> {
    [GENERAL, OWNER, DNS, DATES, TECHNICAL]
        .into_iter()
        .map(|section| {
            let rows: Vec<(String, String)> = fields
                .iter()
                .filter(|(key, value)| section_of(key) == section && !value.is_null())
                .map(|(key, value)| (format!("{}:", field_label(key)), format_value(value)))
                .collect();
            (section, rows)
        })
        .filter(|(_, rows)| !rows.is_empty())
        .collect()
}

fn stamp(now: NaiveDateTime) -> String {
    now.format("%d/%m/%Y à %H:%M:%S").to_string()
}

fn report_header(doc: &mut Document, title: &str, heading: String, now: NaiveDateTime) {
    doc.push(Block::Spacer(4.0));
    doc.push(Block::Title(title.to_string()));
    doc.push(Block::Spacer(6.0));
    doc.push(Block::Heading(heading));
    doc.push(Block::Spacer(4.0));
    doc.push(Block::Text(format!("Date de génération: {}", stamp(now))));
    doc.push(Block::Spacer(6.0));
}

fn footer_note(doc: &mut Document, subject: &str) {
    doc.push(Block::Spacer(6.0));
    doc.push(Block::Footnote(format!(
        "Ce document est généré automatiquement par le système de détection de produits illicites \
         de la Douane Tunisienne. Il contient des informations officielles {subject} et doit être \
         traité avec confidentialité."
    )));
}

/// Domain registration report. `lookup` is the record's fields, or the lookup error.
pub fn whois_document(domain: &str, lookup: Result<&Map<String, JsonValue>, &str>, now: NaiveDateTime) -> Document {
    let mut doc = Document::new(format!("WHOIS {domain}"), now);
    report_header(
        &mut doc,
        "Informations d'enregistrement de domaine",
        format!("Domaine: {domain}"),
        now,
    );

    match lookup {
        Err(error) => {
            doc.push(Block::Label("ERREUR DE RECHERCHE".into()));
            doc.push(Block::Text(format!("Message d'erreur: {error}")));
            doc.push(Block::Spacer(6.0));
        }
        Ok(fields) => {
            doc.push(Block::Label("INFORMATIONS WHOIS".into()));
            for (section, rows) in organize_whois(fields) {
                doc.push(Block::Spacer(2.0));
                doc.push(Block::Label(section.to_string()));
                doc.table(rows, TableStyle::Plain);
            }

            let patterns = suspicious_patterns(fields, now.and_utc());
            if !patterns.is_empty() {
                doc.push(Block::Spacer(4.0));
                doc.push(Block::Label("INDICATEURS SUSPECTS".into()));
                for pattern in patterns {
                    doc.push(Block::Bullet(pattern));
                }
            }
            doc.push(Block::Spacer(4.0));
        }
    }

    doc.push(Block::Label("SIGNATURE ET VALIDATION".into()));
    doc.table(
        vec![
            ("Agent Douanier:".into(), SIGNATURE_LINE.into()),
            ("Date de vérification:".into(), stamp(now)),
            ("Validité du document:".into(), VALIDITY.into()),
        ],
        TableStyle::Summary,
    );
    footer_note(&mut doc, "d'enregistrement de domaine");
    doc
}

/// "49.90 DT (au lieu de 99.00 DT) -50%" when discounted.
pub fn price_line(product: &ExtractedProduct) -> String {
    let Some(current) = product.product_current_price else {
        return "Non disponible".to_string();
    };
    match product.product_original_price {
        Some(original) if original > current => {
            let mut line = format!("{current:.2} DT (au lieu de {original:.2} DT)");
            if let Some(discount) = product.product_discount_percentage
                && discount != 0.0
            {
                line.push_str(&format!(" -{:.0}%", discount.abs()));
            }
            line
        }
        _ => format!("{current:.2} DT"),
    }
}

pub struct Summary {
    pub total: usize,
    pub average: f64,
    pub high_risk: usize,
}

/// Metrics over display-scale (0..=100) scores.
pub fn summarize(products: &[ExtractedProduct]) -> Summary {
    let total = products.len();
    let sum: u32 = products.iter().map(ExtractedProduct::score).sum();
    Summary {
        total,
        average: if total == 0 { 0.0 } else { sum as f64 / total as f64 },
        high_risk: products.iter().filter(|p| p.score() >= HIGH_RISK_SCORE).count(),
    }
}

fn status_label(using_fallback: bool) -> &'static str {
    if using_fallback { "Données de secours" } else { "Complétée" }
}

fn or_unknown(value: Option<&str>, default: &str) -> String {
    value.filter(|v| !v.trim().is_empty()).unwrap_or(default).to_string()
}

fn whois_get(fields: &Map<String, JsonValue>, key: &str) -> String {
    fields.get(key).map(format_value).unwrap_or_else(|| "Non disponible".to_string())
}

fn product_section(doc: &mut Document, index: usize, product: &ExtractedProduct) {
    doc.push(Block::Label(format!("Produit {}: {}", index + 1, product.title_or_default())));

    let mut rows = vec![
        ("Titre du produit:".to_string(), product.title_or_default().to_string()),
        ("Prix:".to_string(), price_line(product)),
        ("Score de suspicion:".to_string(), format!("{}/100", product.score())),
        ("URL du produit:".to_string(), or_unknown(product.page_url.as_deref(), "Non disponible")),
        ("Site vendeur:".to_string(), or_unknown(product.business_website.as_deref(), "Non spécifié")),
    ];

    let whois = product.whois_info.as_ref();
    match whois {
        Some(info) if info.contains_key("error") => {
            rows.push(("Informations WHOIS:".into(), format!("Erreur: {}", whois_get(info, "error"))));
        }
        Some(info) if !info.is_empty() => {
            rows.push(("Domaine enregistré:".into(), whois_get(info, "domain_name")));
            rows.push(("Registrar:".into(), whois_get(info, "registrar")));
            rows.push(("Date de création:".into(), whois_get(info, "creation_date")));
        }
        _ => rows.push(("Informations WHOIS:".into(), "Non disponibles".into())),
    }
    doc.table(rows, TableStyle::Suspicious);
    doc.push(Block::Spacer(3.0));

    if product.suspicion_reasons.is_empty() {
        doc.push(Block::Text("Raisons de suspicion: Aucune raison spécifique identifiée".into()));
    } else {
        doc.push(Block::Label("Raisons de suspicion:".into()));
        for reason in &product.suspicion_reasons {
            doc.push(Block::Bullet(reason.clone()));
        }
    }

    if let Some(info) = whois.filter(|i| !i.is_empty() && !i.contains_key("error")) {
        doc.push(Block::Spacer(4.0));
        doc.push(Block::Label("INFORMATIONS WHOIS DÉTAILLÉES".into()));
        doc.push(Block::Label("Domaine et Enregistrement:".into()));
        let domain_rows = [
            "domain_name",
            "registrar",
            "registrar_url",
            "registrar_iana_id",
            "whois_server",
            "creation_date",
            "updated_date",
            "expiration_date",
            "status",
            "dnssec",
        ]
        .iter()
        .filter_map(|key| info.get(*key).map(|v| (field_label(key), format_value(v))))
        .collect();
        doc.table(domain_rows, TableStyle::Domain);

        for (prefix, title) in [
            ("registrant", "Contact Registrant:"),
            ("admin", "Contact Administratif:"),
            ("tech", "Contact Technique:"),
        ] {
            let contact_rows: Vec<(String, String)> = [
                "name", "first_name", "organization", "address", "city", "state", "zipcode", "country",
                "phone", "fax", "email",
            ]
            .iter()
            .filter_map(|field| {
                let value = info.get(&format!("{prefix}_{field}"))?;
                let label = contact_field_label(field).unwrap_or(*field);
                Some((label.to_string(), format_value(value)))
            })
            .collect();
            if !contact_rows.is_empty() {
                doc.push(Block::Label(title.to_string()));
                doc.table(contact_rows, TableStyle::Contact);
            }
        }

        if let Some(servers) = info.get("name_servers") {
            doc.push(Block::Label("Serveurs de Noms:".into()));
            doc.table(
                vec![("Serveurs de noms:".into(), format_value(servers))],
                TableStyle::NameServer,
            );
        }
    }
    doc.push(Block::Spacer(5.0));
}

/// Analysis report over display-scale products and the unscraped search hits.
pub fn analysis_document(
    category: &str,
    products: &[ExtractedProduct],
    other_results: &[DisplayResult],
    using_fallback: bool,
    now: NaiveDateTime,
) -> Document {
    let mut doc = Document::new(format!("Analyse {category}"), now);
    report_header(
        &mut doc,
        "Rapport d'Analyse Automatisée",
        format!("Catégorie analysée: {category}"),
        now,
    );

    if using_fallback {
        doc.push(Block::Label("AVERTISSEMENT: DONNÉES DE SECOURS UTILISÉES".into()));
        doc.push(Block::Text(
            "Ce rapport a été généré à partir de données de secours en raison de l'impossibilité \
             de récupérer les données en temps réel."
                .into(),
        ));
        doc.push(Block::Spacer(6.0));
    }

    let summary = summarize(products);
    doc.push(Block::Label("RÉSUMÉ EXECUTIF".into()));
    doc.table(
        vec![
            ("Produits analysés:".into(), summary.total.to_string()),
            ("Score moyen de suspicion:".into(), format!("{:.1}/100", summary.average)),
            ("Produits à risque élevé:".into(), summary.high_risk.to_string()),
            ("Statut de l'analyse:".into(), status_label(using_fallback).into()),
        ],
        TableStyle::Summary,
    );
    doc.push(Block::Spacer(6.0));

    if products.is_empty() {
        doc.push(Block::Label("AUCUN PRODUIT SUSPECT DÉTECTÉ".into()));
        doc.push(Block::Text("Aucun produit suspect n'a été détecté lors de cette analyse.".into()));
        doc.push(Block::Spacer(6.0));
    } else {
        doc.push(Block::Label("ANALYSE DÉTAILLÉE DES PRODUITS".into()));
        for (i, product) in products.iter().enumerate() {
            product_section(&mut doc, i, product);
            if i + 1 < products.len() {
                doc.push(Block::PageBreak);
            }
        }
    }

    if !other_results.is_empty() && !using_fallback {
        doc.push(Block::Label("AUTRES PRODUITS POTENTIELS".into()));
        for result in other_results {
            doc.table(
                vec![
                    ("Titre:".into(), or_unknown(Some(result.title.as_str()), "Non spécifié")),
                    ("Score de suspicion:".into(), format!("{}/100", result.display_score)),
                    ("URL:".into(), result.url.clone()),
                ],
                TableStyle::Suspicious,
            );
            doc.push(Block::Spacer(3.0));
        }
    }

    doc.push(Block::Label("SIGNATURE ET VALIDATION".into()));
    doc.table(
        vec![
            ("Agent Douanier:".into(), SIGNATURE_LINE.into()),
            ("Date d'analyse:".into(), stamp(now)),
            ("Catégorie analysée:".into(), category.to_string()),
            ("Statut de l'analyse:".into(), status_label(using_fallback).into()),
            ("Validité du document:".into(), VALIDITY.into()),
        ],
        TableStyle::Summary,
    );
    footer_note(&mut doc, "d'analyse");
    doc
}
