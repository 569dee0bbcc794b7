//! SAFER carrier snapshot parser
//!
//! The snapshot page is a nest of legacy tables. Scalar fields live in
//! `<th>label</th><td>value</td>` pairs; check-box sections mark selected
//! items with an `X` cell followed by the item label; safety tables are
//! found by their `summary` attribute. Missing sections leave defaults.

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

use super::{DocumentParser, ParseError};
use crate::models::{
    Address, CarrierRecord, CompanyIdentity, ContactInfo, CrashSummary, Identifier,
    InspectionBreakdown, InspectionSummary, OperatingStatus, Operations, RecordMetadata,
    SafetyRating, SafetyRecord,
};

const SOURCE: &str = "FMCSA SAFER";
const DATE_FORMAT: &str = "%m/%d/%Y";

struct Selectors {
    th: Selector,
    tr: Selector,
    a: Selector,
    font: Selector,
    b: Selector,
    field: Selector,
    label: Selector,
    inspections: Selector,
    crashes: Selector,
    review: Selector,
    physical_address: Selector,
    mailing_address: Selector,
}

struct Patterns {
    whitespace: Regex,
    snapshot_date: Regex,
    mileage: Regex,
    state_zip: Regex,
    us_total_inspections: Regex,
    us_total_iep: Regex,
    canada_total_inspections: Regex,
}

/// Parses SAFER "Company Snapshot" pages into [`CarrierRecord`]s
pub struct CarrierSnapshotParser {
    selectors: Selectors,
    patterns: Patterns,
}

#[allow(clippy::expect_used)]
fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

#[allow(clippy::expect_used)]
fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("static pattern is valid")
}

impl Default for CarrierSnapshotParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CarrierSnapshotParser {
    pub fn new() -> Self {
        Self {
            selectors: Selectors {
                th: selector("th"),
                tr: selector("tr"),
                a: selector("a"),
                font: selector("font"),
                b: selector("b"),
                field: selector("td.queryfield"),
                label: selector("th.querylabelbkg"),
                inspections: selector(r#"table[summary="Inspections"]"#),
                crashes: selector(r#"table[summary="Crashes"]"#),
                review: selector(r#"table[summary="Review Information"]"#),
                physical_address: selector("td#physicaladdressvalue"),
                mailing_address: selector("td#mailingaddressvalue"),
            },
            patterns: Patterns {
                whitespace: pattern(r"\s+"),
                snapshot_date: pattern(
                    r"(?i)the information below reflects.*?as of\s*(\d{2}/\d{2}/\d{4})",
                ),
                mileage: pattern(r"([\d,]+)\s*\((\d{4})\)"),
                state_zip: pattern(r"(?i)([A-Z]{2})\s+(\d{5}(?:-\d{4})?)\s*$"),
                us_total_inspections: pattern(r"Total Inspections:\s*(\d+)"),
                us_total_iep: pattern(r"Total IEP Inspections:\s*(\d+)"),
                canada_total_inspections: pattern(r"Total inspections:\s*(\d+)"),
            },
        }
    }

    fn clean(&self, text: &str) -> String {
        self.patterns
            .whitespace
            .replace_all(text, " ")
            .trim()
            .to_string()
    }

    /// Value cell following the first `<th>` whose text contains `label`
    fn table_value(&self, html: &Html, label: &str) -> Option<String> {
        let needle = label.to_lowercase();
        html.select(&self.selectors.th)
            .find(|th| text_of(*th).to_lowercase().contains(&needle))
            .and_then(|th| next_sibling_named(th, "td"))
            .map(|td| self.clean(&text_of(td)))
            .filter(|value| !value.is_empty())
    }

    /// Labels of the items marked `X` in a check-box section
    fn checked_items(&self, html: &Html, section: &str) -> Vec<String> {
        let needle = section.to_lowercase();
        let header = html
            .select(&self.selectors.a)
            .find(|a| text_of(*a).to_lowercase().contains(&needle))
            .or_else(|| text_parent(html, &needle));

        let content_row = header
            .and_then(|h| h.ancestors().filter_map(ElementRef::wrap).find(|e| e.value().name() == "tr"))
            .and_then(|row| next_sibling_named(row, "tr"));

        let Some(content_row) = content_row else {
            return Vec::new();
        };

        content_row
            .select(&self.selectors.field)
            .filter(|cell| text_of(*cell).trim() == "X")
            .filter_map(|cell| next_sibling_named(cell, "td"))
            .map(|td| self.clean(&text_of(td)))
            .filter(|item| !item.is_empty())
            .collect()
    }

    fn legal_name(&self, html: &Html) -> Option<String> {
        html.select(&self.selectors.font)
            .filter(|font| {
                let el = font.value();
                el.attr("size") == Some("3")
                    && el.attr("face").is_some_and(|face| face.eq_ignore_ascii_case("arial"))
            })
            .find_map(|font| font.select(&self.selectors.b).next())
            .map(|b| self.clean(&text_of(b)))
            .filter(|name| !name.is_empty())
            .or_else(|| self.table_value(html, "Legal Name"))
    }

    fn authority_numbers(&self, html: &Html) -> Vec<String> {
        html.select(&self.selectors.th)
            .find(|th| text_of(*th).to_lowercase().contains("mc/mx/ff number"))
            .and_then(|th| next_sibling_named(th, "td"))
            .map(|td| {
                td.select(&self.selectors.a)
                    .map(|a| self.clean(&text_of(a)))
                    .filter(|number| !number.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn address(&self, html: &Html, cell: &Selector, label: &str) -> Address {
        let text = match html.select(cell).next() {
            Some(td) => multiline_text(td),
            None => self.table_value(html, label).unwrap_or_default(),
        };
        self.parse_address(&text)
    }

    /// Line 1 is the street, line 2 is `CITY, ST ZIP`
    fn parse_address(&self, text: &str) -> Address {
        let lines: Vec<String> = text
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|line| !line.is_empty())
            .collect();

        let mut address = Address::default();
        match lines.as_slice() {
            [] => {}
            [single] => {
                address.street = Some(single.clone());
                if let Some((remaining, state, zip)) = self.split_state_zip(single) {
                    address.state = Some(state);
                    address.zip_code = Some(zip);
                    match remaining.rsplit_once(',') {
                        Some((street, city)) => {
                            address.street = non_empty(street);
                            address.city = non_empty(city);
                        }
                        None => address.street = non_empty(&remaining),
                    }
                }
            }
            [street, rest @ ..] => match self.split_state_zip(&rest.join(" ")) {
                Some((city, state, zip)) => {
                    address.street = Some(street.clone());
                    address.city = non_empty(&city);
                    address.state = Some(state);
                    address.zip_code = Some(zip);
                }
                None => address.street = Some(lines.join(" ")),
            },
        }
        address
    }

    /// Split `... ST 12345[-6789]` into (prefix without trailing comma, state, zip)
    fn split_state_zip(&self, text: &str) -> Option<(String, String, String)> {
        let caps = self.patterns.state_zip.captures(text)?;
        let whole = caps.get(0)?;
        let remaining = text[..whole.start()].trim().trim_end_matches(',').trim().to_string();
        Some((remaining, caps[1].to_uppercase(), caps[2].to_string()))
    }

    fn operating_status(&self, html: &Html) -> OperatingStatus {
        let authority = self.table_value(html, "Operating Authority Status").map(|status| {
            if status.to_uppercase().contains("NOT AUTHORIZED") {
                "NOT AUTHORIZED".to_string()
            } else {
                status
            }
        });

        let (mileage, mileage_year) = self
            .table_value(html, "MCS-150 Mileage")
            .and_then(|text| {
                let caps = self.patterns.mileage.captures(&text)?;
                let miles: i64 = caps[1].replace(',', "").parse().ok()?;
                let year: i32 = caps[2].parse().ok()?;
                Some((Some(miles), Some(year)))
            })
            .unwrap_or((None, None));

        OperatingStatus {
            usdot_status: self.table_value(html, "USDOT Status"),
            operating_authority_status: authority,
            out_of_service_date: self
                .table_value(html, "Out of Service Date")
                .and_then(|d| parse_date(&d)),
            mcs_150_form_date: self
                .table_value(html, "MCS-150 Form Date")
                .and_then(|d| parse_date(&d)),
            mcs_150_mileage: mileage,
            mcs_150_mileage_year: mileage_year,
        }
    }

    /// Query-field cells of row `index` in `table`
    fn row_cells(&self, rows: &[ElementRef<'_>], index: usize) -> Vec<String> {
        rows.get(index)
            .map(|row| {
                row.select(&self.selectors.field)
                    .map(|td| text_of(td).trim().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Inspection table with `columns` breakdown columns (4 for US, 2 for Canada)
    fn inspections(&self, table: Option<ElementRef<'_>>, columns: usize) -> InspectionSummary {
        let mut breakdown = [InspectionBreakdown::default(); 4];
        if let Some(table) = table {
            let rows: Vec<ElementRef<'_>> = table.select(&self.selectors.tr).collect();

            let counts = self.row_cells(&rows, 1);
            if counts.len() >= columns {
                for (slot, cell) in breakdown.iter_mut().zip(&counts).take(columns) {
                    slot.inspections = parse_count(cell);
                }
            }
            let out_of_service = self.row_cells(&rows, 2);
            if out_of_service.len() >= columns {
                for (slot, cell) in breakdown.iter_mut().zip(&out_of_service).take(columns) {
                    slot.out_of_service = parse_count(cell);
                }
            }
            let rates = self.row_cells(&rows, 3);
            if rates.len() >= columns {
                for (slot, cell) in breakdown.iter_mut().zip(&rates).take(columns) {
                    slot.out_of_service_rate_pct = parse_rate(cell);
                }
            }
        }

        let [vehicle, driver, hazmat, iep] = breakdown;
        InspectionSummary {
            total_inspections: 0,
            total_iep_inspections: 0,
            vehicle,
            driver,
            hazmat,
            iep,
        }
    }

    fn crashes(&self, table: Option<ElementRef<'_>>) -> CrashSummary {
        let Some(table) = table else {
            return CrashSummary::default();
        };
        let rows: Vec<ElementRef<'_>> = table.select(&self.selectors.tr).collect();
        match self.row_cells(&rows, 1).as_slice() {
            [fatal, injury, tow, total, ..] => CrashSummary {
                fatal: parse_count(fatal),
                injury: parse_count(injury),
                tow: parse_count(tow),
                total: parse_count(total),
            },
            _ => CrashSummary::default(),
        }
    }

    fn safety_rating(&self, html: &Html) -> SafetyRating {
        let mut rating = SafetyRating::default();
        let Some(table) = html.select(&self.selectors.review).next() else {
            return rating;
        };

        for row in table.select(&self.selectors.tr) {
            let values: Vec<String> = row
                .select(&self.selectors.field)
                .map(|td| self.clean(&text_of(td)))
                .collect();

            for (label, value) in row
                .select(&self.selectors.label)
                .map(|th| self.clean(&text_of(th)))
                .zip(values)
            {
                let value = (!value.eq_ignore_ascii_case("none") && !value.is_empty()).then_some(value);
                if label.contains("Rating Date") {
                    rating.rating_date = value.as_deref().and_then(parse_date);
                } else if label.contains("Review Date") {
                    rating.review_date = value.as_deref().and_then(parse_date);
                } else if label.contains("Rating") && !label.contains("Date") {
                    rating.rating = value;
                } else if label.contains("Type") {
                    rating.rating_type = value;
                }
            }
        }
        rating
    }

    fn capture_count(re: &Regex, text: &str) -> i32 {
        re.captures(text)
            .and_then(|caps| caps[1].parse().ok())
            .unwrap_or(0)
    }
}

impl DocumentParser for CarrierSnapshotParser {
    type Record = CarrierRecord;

    fn parse(&self, document: &str) -> Result<CarrierRecord, ParseError> {
        if document.trim().is_empty() {
            return Err(ParseError::EmptyDocument);
        }

        let html = Html::parse_document(document);
        let page_text = self.clean(&html.root_element().text().collect::<String>());

        let snapshot_date = self
            .patterns
            .snapshot_date
            .captures(&page_text)
            .and_then(|caps| parse_date(&caps[1]));

        let usdot_number = self
            .table_value(&html, "USDOT Number")
            .filter(|n| n.chars().all(|c| c.is_ascii_digit()))
            .map(Identifier::new);

        let dba_name = self
            .table_value(&html, "DBA Name")
            .filter(|name| !name.eq_ignore_ascii_case("none"));
        let duns_number = self
            .table_value(&html, "DUNS Number")
            .filter(|duns| duns != "--" && !duns.eq_ignore_ascii_case("none"));

        let inspection_tables: Vec<ElementRef<'_>> = html.select(&self.selectors.inspections).collect();
        let crash_tables: Vec<ElementRef<'_>> = html.select(&self.selectors.crashes).collect();

        let mut us_inspections = self.inspections(inspection_tables.first().copied(), 4);
        us_inspections.total_inspections =
            Self::capture_count(&self.patterns.us_total_inspections, &page_text);
        us_inspections.total_iep_inspections =
            Self::capture_count(&self.patterns.us_total_iep, &page_text);

        let mut canada_inspections = self.inspections(inspection_tables.get(1).copied(), 2);
        canada_inspections.total_inspections =
            Self::capture_count(&self.patterns.canada_total_inspections, &page_text);

        Ok(CarrierRecord {
            metadata: RecordMetadata {
                source: SOURCE.to_string(),
                snapshot_date,
                usdot_number,
                entity_type: self.table_value(&html, "Entity Type"),
            },
            identity: CompanyIdentity {
                legal_name: self.legal_name(&html),
                dba_name,
                authority_numbers: self.authority_numbers(&html),
                duns_number,
            },
            contact: ContactInfo {
                phone: self.table_value(&html, "Phone"),
                physical_address: self.address(
                    &html,
                    &self.selectors.physical_address,
                    "Physical Address",
                ),
                mailing_address: self.address(
                    &html,
                    &self.selectors.mailing_address,
                    "Mailing Address",
                ),
            },
            status: self.operating_status(&html),
            operations: Operations {
                power_units: self.table_value(&html, "Power Units").and_then(|v| parse_whole(&v)),
                drivers: self.table_value(&html, "Drivers").and_then(|v| parse_whole(&v)),
                operation_classifications: self.checked_items(&html, "Operation Classification"),
                cargo_carried: self.checked_items(&html, "Cargo Carried"),
            },
            safety: SafetyRecord {
                us_inspections,
                canada_inspections,
                us_crashes: self.crashes(crash_tables.first().copied()),
                canada_crashes: self.crashes(crash_tables.get(1).copied()),
                safety_rating: self.safety_rating(&html),
            },
        })
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect()
}

fn next_sibling_named<'a>(element: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    element
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|sibling| sibling.value().name() == name)
}

/// Parent element of the first text node containing `needle` (lowercase)
fn text_parent<'a>(html: &'a Html, needle: &str) -> Option<ElementRef<'a>> {
    html.root_element()
        .descendants()
        .find(|node| {
            node.value()
                .as_text()
                .is_some_and(|text| text.to_lowercase().contains(needle))
        })
        .and_then(|node| node.parent())
        .and_then(ElementRef::wrap)
}

/// Cell text with `<br>` kept as line breaks
fn multiline_text(cell: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in cell.descendants() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) if element.name() == "br" => out.push('\n'),
            _ => {}
        }
    }
    out.replace('\u{a0}', " ")
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

fn parse_whole(value: &str) -> Option<i32> {
    let digits = value.replace(',', "");
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn parse_count(value: &str) -> i32 {
    parse_whole(value.trim()).unwrap_or(0)
}

fn parse_rate(value: &str) -> Option<f64> {
    let value = value.trim().trim_end_matches('%').trim();
    if value.is_empty() {
        return None;
    }
    value.parse().ok()
}
