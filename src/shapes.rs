use chrono::NaiveDate;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::warn;

use crate::extractor::page_text;
use crate::parsing::{build_date, extract_price, infer_year, month_from_name, parse_time};
use crate::registry::SourceConfig;
use crate::types::RawFieldSet;

/// Structural classification of a listing page. Most venue sites expose one
/// of these shapes; the selector-driven extractor covers the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventShape {
    /// `"15/11 CONTRAST pres. CRITICAL MUSIC | 18+"` runs of prose.
    DateInTitleProse,
    /// `"Freitag 21. November"` / `"19:00 Uhr"` / ALL-CAPS title lines.
    WeekdayProse,
    /// Month-name header lines above bare `"15.09"` date lines.
    MonthHeaderProse,
    /// `"Do 7. Aug"` / `"23:00 - 06:00"` / `"### Title"` lines.
    AbbrevWeekdayProse,
    /// `"Do. 20.11.2025 18:00, Eintritt: ..."` followed by the title line.
    FullDateProse,
    /// `"do 100725 20:00Live..."` compact records.
    CompactProse,
    /// Single text cells like `"Title 12-07 | 23:00-06:00| Club"`.
    PipeDelimited,
    /// Table rows with a date cell and a mixed details cell.
    TableInline,
    /// Script-rendered DOM; needs the external browser capability.
    ScriptRendered,
}

impl EventShape {
    pub fn from_name(name: &str) -> Option<EventShape> {
        let shape = match name {
            "date_in_title_prose" => EventShape::DateInTitleProse,
            "weekday_prose" => EventShape::WeekdayProse,
            "month_header_prose" => EventShape::MonthHeaderProse,
            "abbrev_weekday_prose" => EventShape::AbbrevWeekdayProse,
            "full_date_prose" => EventShape::FullDateProse,
            "compact_prose" => EventShape::CompactProse,
            "pipe_delimited" => EventShape::PipeDelimited,
            "table_inline" => EventShape::TableInline,
            "script_rendered" => EventShape::ScriptRendered,
            _ => return None,
        };
        Some(shape)
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventShape::DateInTitleProse => "date_in_title_prose",
            EventShape::WeekdayProse => "weekday_prose",
            EventShape::MonthHeaderProse => "month_header_prose",
            EventShape::AbbrevWeekdayProse => "abbrev_weekday_prose",
            EventShape::FullDateProse => "full_date_prose",
            EventShape::CompactProse => "compact_prose",
            EventShape::PipeDelimited => "pipe_delimited",
            EventShape::TableInline => "table_inline",
            EventShape::ScriptRendered => "script_rendered",
        }
    }
}

/// Static shape lookup by source id. This is a known compromise: it keys on
/// the source identifier rather than sniffing document structure.
pub fn shape_for_source(source_id: &str) -> Option<EventShape> {
    let shape = match source_id {
        "grelle-forelle" => EventShape::DateInTitleProse,
        "das-werk" => EventShape::WeekdayProse,
        "b72" => EventShape::MonthHeaderProse,
        "sass-music-club" => EventShape::AbbrevWeekdayProse,
        "the-loft" => EventShape::FullDateProse,
        "rhiz" => EventShape::CompactProse,
        "celeste" => EventShape::PipeDelimited,
        "chelsea" => EventShape::TableInline,
        "flex" | "u4" | "prater-dome" | "pratersauna" => EventShape::ScriptRendered,
        _ => return None,
    };
    Some(shape)
}

/// Shape for one source: an explicit config override wins over the lookup.
pub fn resolve_shape(config: &SourceConfig) -> Option<EventShape> {
    if let Some(name) = &config.shape {
        match EventShape::from_name(name) {
            Some(shape) => return Some(shape),
            None => {
                warn!(source_id = %config.source_id, shape = %name, "unknown shape name, falling back to lookup");
            }
        }
    }
    shape_for_source(&config.source_id)
}

/// Dispatches a fetched document to the sub-parser for its shape.
/// `ScriptRendered` yields nothing here; the pipeline routes those documents
/// through the browser capability and the selector engine instead.
pub fn parse_with_shape(shape: EventShape, body: &str, today: NaiveDate) -> Vec<RawFieldSet> {
    match shape {
        EventShape::DateInTitleProse => parse_date_in_title(&text_of(body), today),
        EventShape::WeekdayProse => parse_weekday_prose(&text_of(body), today),
        EventShape::MonthHeaderProse => parse_month_header(&text_of(body), today),
        EventShape::AbbrevWeekdayProse => parse_abbrev_weekday(&text_of(body), today),
        EventShape::FullDateProse => parse_full_date(&text_of(body)),
        EventShape::CompactProse => parse_compact(&text_of(body)),
        EventShape::PipeDelimited => parse_pipe_delimited(&text_of(body), today),
        EventShape::TableInline => parse_table_inline(body, today),
        EventShape::ScriptRendered => Vec::new(),
    }
}

fn text_of(body: &str) -> String {
    page_text(&Html::parse_document(body))
}

// "15/11 CONTRAST pres. CRITICAL MUSIC w/ ENEI | 18+" followed directly by
// the next "DD/MM ..." run. Segments are sliced between date matches since
// the records carry no other delimiter.
fn parse_date_in_title(text: &str, today: NaiveDate) -> Vec<RawFieldSet> {
    let date_re = Regex::new(r"\b(\d{2})/(\d{2})\b").unwrap();
    let age_re = Regex::new(r"(\d+)\s*\+").unwrap();

    let matches: Vec<(usize, usize)> = date_re
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect();

    let mut events = Vec::new();
    for (i, (start, date_end)) in matches.iter().enumerate() {
        let segment_end = matches.get(i + 1).map(|(s, _)| *s).unwrap_or(text.len());
        let date_text = &text[*start..*date_end];
        let remainder = &text[*date_end..segment_end];

        let (title_part, tail) = match remainder.find('|') {
            Some(idx) => (&remainder[..idx], Some(&remainder[idx + 1..])),
            None => (remainder, None),
        };
        let title = collapse(title_part);
        if title.is_empty() {
            continue;
        }

        let caps = date_re.captures(date_text);
        let date = caps.and_then(|c| {
            let day: u32 = c[1].parse().ok()?;
            let month: u32 = c[2].parse().ok()?;
            build_date(infer_year(day, month, today), month, day)
        });

        let description = tail
            .and_then(|t| age_re.captures(t))
            .map(|c| format!("Age: {}+", &c[1]));

        events.push(RawFieldSet {
            title: Some(title),
            date_text: Some(date_text.to_string()),
            date,
            description,
            ..RawFieldSet::default()
        });
    }
    events
}

// "Freitag 21. November" and "19:00 Uhr" lines set context; an ALL-CAPS line
// emits an event with whatever context is current.
fn parse_weekday_prose(text: &str, today: NaiveDate) -> Vec<RawFieldSet> {
    let date_re = Regex::new(r"(\d{1,2})\.\s+(\p{L}+)").unwrap();
    let time_re = Regex::new(r"(?i)(\d{2}:\d{2})\s*Uhr").unwrap();

    let mut events = Vec::new();
    let mut current_date: Option<NaiveDate> = None;
    let mut current_time = None;

    for line in text.lines() {
        let line = line.trim();

        if let Some(caps) = date_re.captures(line) {
            let day: u32 = match caps[1].parse() {
                Ok(d) => d,
                Err(_) => continue,
            };
            if let Some(month) = month_from_name(&caps[2]) {
                current_date = build_date(infer_year(day, month, today), month, day);
                continue;
            }
        }

        if let Some(caps) = time_re.captures(line) {
            current_time = parse_time(&caps[1]);
            continue;
        }

        let is_title = line.chars().any(|c| c.is_alphabetic())
            && !line.chars().any(|c| c.is_lowercase())
            && line.chars().count() > 5;
        if is_title && current_date.is_some() {
            events.push(RawFieldSet {
                title: Some(line.to_string()),
                date: current_date,
                time: current_time,
                ..RawFieldSet::default()
            });
        }
    }
    events
}

// A bare month-name line opens a section; "15.09" lines inside a section
// take the following line as their title.
fn parse_month_header(text: &str, today: NaiveDate) -> Vec<RawFieldSet> {
    let date_re = Regex::new(r"^(\d{2})\.(\d{2})$").unwrap();

    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let mut events = Vec::new();
    let mut in_section = false;

    for (i, line) in lines.iter().enumerate() {
        if month_from_name(line).is_some() {
            in_section = true;
            continue;
        }

        let caps = match date_re.captures(line) {
            Some(c) if in_section => c,
            _ => continue,
        };
        let day: u32 = match caps[1].parse() {
            Ok(d) => d,
            Err(_) => continue,
        };
        let month: u32 = match caps[2].parse() {
            Ok(m) => m,
            Err(_) => continue,
        };

        let title = match lines.get(i + 1) {
            Some(next) if !next.is_empty() => next.to_string(),
            _ => continue,
        };

        events.push(RawFieldSet {
            title: Some(title),
            date_text: Some(line.to_string()),
            date: build_date(infer_year(day, month, today), month, day),
            ..RawFieldSet::default()
        });
    }
    events
}

// "Do 7. Aug" and "23:00 - 06:00" lines set context; "### Title" emits.
fn parse_abbrev_weekday(text: &str, today: NaiveDate) -> Vec<RawFieldSet> {
    let date_re = Regex::new(r"^\p{L}{2}\s*(\d{1,2})\.\s*(\p{L}+)$").unwrap();
    let time_re = Regex::new(r"^(\d{2}:\d{2})\s*-\s*\d{2}:\d{2}$").unwrap();

    let mut events = Vec::new();
    let mut current_date: Option<NaiveDate> = None;
    let mut current_time = None;

    for line in text.lines() {
        let line = line.trim();

        if let Some(caps) = date_re.captures(line) {
            let day: u32 = match caps[1].parse() {
                Ok(d) => d,
                Err(_) => continue,
            };
            if let Some(month) = month_from_name(&caps[2]) {
                current_date = build_date(infer_year(day, month, today), month, day);
            }
            continue;
        }

        if let Some(caps) = time_re.captures(line) {
            current_time = parse_time(&caps[1]);
            continue;
        }

        if line.starts_with("###") && current_date.is_some() {
            let title = line.replace("###", "").trim().to_string();
            if title.is_empty() {
                continue;
            }
            events.push(RawFieldSet {
                title: Some(title),
                date: current_date,
                time: current_time,
                ..RawFieldSet::default()
            });
        }
    }
    events
}

// "Do. 20.11.2025 18:00, Eintritt: € 24/26" with the title on the next line.
// The year is always explicit in this shape.
fn parse_full_date(text: &str) -> Vec<RawFieldSet> {
    let record_re = Regex::new(
        r"\p{L}{2}\.\s*(\d{1,2})\.(\d{1,2})\.(\d{4})\s*(\d{2}:\d{2})([^\n]*)\n([^\n]+)",
    )
    .unwrap();

    let mut events = Vec::new();
    for caps in record_re.captures_iter(text) {
        let day: u32 = match caps[1].parse() {
            Ok(d) => d,
            Err(_) => continue,
        };
        let month: u32 = match caps[2].parse() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let year: i32 = match caps[3].parse() {
            Ok(y) => y,
            Err(_) => continue,
        };
        let title = caps[6].trim().to_string();
        if title.is_empty() {
            continue;
        }

        let tail = caps[5].trim().to_string();
        events.push(RawFieldSet {
            title: Some(title),
            date: build_date(year, month, day),
            time: parse_time(&caps[4]),
            price_text: if tail.is_empty() { None } else { Some(tail.clone()) },
            price: extract_price(&tail),
            ..RawFieldSet::default()
        });
    }
    events
}

// "do 100725 20:00Live NØ MAN (US) + support" records: lowercase weekday,
// DDMMYY, start time, an optional category marker glued to the time, then
// the title.
fn parse_compact(text: &str) -> Vec<RawFieldSet> {
    let record_re = Regex::new(r"([a-z]{2})\s+(\d{6})\s+(\d{2}:\d{2})[A-Za-z]*([^\n]+)").unwrap();

    let mut events = Vec::new();
    for caps in record_re.captures_iter(text) {
        let digits = &caps[2];
        let day: u32 = match digits[0..2].parse() {
            Ok(d) => d,
            Err(_) => continue,
        };
        let month: u32 = match digits[2..4].parse() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let year: i32 = match digits[4..6].parse::<i32>() {
            Ok(y) => 2000 + y,
            Err(_) => continue,
        };
        let title = caps[4].trim().to_string();
        if title.is_empty() {
            continue;
        }

        events.push(RawFieldSet {
            title: Some(title),
            date_text: Some(digits.to_string()),
            date: build_date(year, month, day),
            time: parse_time(&caps[3]),
            ..RawFieldSet::default()
        });
    }
    events
}

// "Title 12-07 | 23:00-06:00| Club|Artists" single-cell records. The whole
// line doubles as the description since the fields are not individually
// addressable.
fn parse_pipe_delimited(text: &str, today: NaiveDate) -> Vec<RawFieldSet> {
    let date_re = Regex::new(r"(\d{1,2})-(\d{1,2})").unwrap();
    let time_re = Regex::new(r"(\d{2}:\d{2})-\d{2}:\d{2}").unwrap();

    let mut events = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if !line.contains('|') || line.chars().count() < 10 {
            continue;
        }

        let caps = match date_re.captures(line) {
            Some(c) => c,
            None => continue,
        };
        let day: u32 = match caps[1].parse() {
            Ok(d) => d,
            Err(_) => continue,
        };
        let month: u32 = match caps[2].parse() {
            Ok(m) => m,
            Err(_) => continue,
        };

        let title_end = caps.get(0).map(|m| m.start()).unwrap_or(0);
        let title = line[..title_end].trim().to_string();
        if title.is_empty() {
            continue;
        }

        let time = time_re
            .captures(line)
            .and_then(|c| parse_time(&c[1]));

        events.push(RawFieldSet {
            title: Some(title),
            date: build_date(infer_year(day, month, today), month, day),
            time,
            description: Some(line.to_string()),
            ..RawFieldSet::default()
        });
    }
    events
}

// Table rows: first cell "So, 27.07.", second cell mixes the title with
// "Doors:"/"VVK:" markers.
fn parse_table_inline(body: &str, today: NaiveDate) -> Vec<RawFieldSet> {
    let row_selector = Selector::parse("tr").unwrap();
    let cell_selector = Selector::parse("td").unwrap();
    let date_re = Regex::new(r"(\d{1,2})\.(\d{1,2})\.").unwrap();
    let marker_re = Regex::new(r"VVK:|Doors:").unwrap();
    let doors_re = Regex::new(r"Doors:\s*(\d{1,2})h").unwrap();
    let price_re = Regex::new(r"VVK:\s*€?\s*(\d+(?:[.,]\d{2})?)").unwrap();

    let document = Html::parse_document(body);
    let mut events = Vec::new();

    for row in document.select(&row_selector) {
        let cells: Vec<String> = row
            .select(&cell_selector)
            .map(|c| collapse(&c.text().collect::<Vec<_>>().join(" ")))
            .collect();
        if cells.len() < 2 {
            continue;
        }
        let date_text = &cells[0];
        let details = &cells[1];

        let caps = match date_re.captures(date_text) {
            Some(c) => c,
            None => continue,
        };
        let day: u32 = match caps[1].parse() {
            Ok(d) => d,
            Err(_) => continue,
        };
        let month: u32 = match caps[2].parse() {
            Ok(m) => m,
            Err(_) => continue,
        };

        let title = marker_re
            .split(details)
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        if title.is_empty() {
            continue;
        }

        let time = doors_re
            .captures(details)
            .and_then(|c| c[1].parse::<u32>().ok())
            .and_then(|hour| chrono::NaiveTime::from_hms_opt(hour, 0, 0));
        let price = price_re
            .captures(details)
            .map(|c| format!("ab €{}", c[1].replace(',', ".")));

        events.push(RawFieldSet {
            title: Some(title),
            date_text: Some(date_text.clone()),
            date: build_date(infer_year(day, month, today), month, day),
            time,
            price,
            description: Some(details.clone()),
            ..RawFieldSet::default()
        });
    }
    events
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
