use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Metadata recovered from a filename. Every field is best-effort.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedMetadata {
    pub series: Option<String>,
    pub season: Option<i64>,
    pub episode: Option<String>,
    pub year: Option<i64>,
    pub channel: Option<String>,
}

impl ParsedMetadata {
    pub fn is_empty(&self) -> bool {
        self.series.is_none()
            && self.season.is_none()
            && self.episode.is_none()
            && self.year.is_none()
            && self.channel.is_none()
    }
}

fn patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Show Name S01E01 2023 HBO / Show_Name_S02E05_2023_HBO
            r"(?i)^(?P<series>.*?)\s*[_\s-]*S(?P<season>\d+)E(?P<episode>\d+)\s*[_\s-]*(?P<year>\d{4})?\s*[_\s-]*(?P<channel>[\w\s]+)?$",
            // [HBO] Show Name - S01E01 - 2023
            r"(?i)^\[(?P<channel>[^\]]+)\]\s*(?P<series>.*?)\s*[_\s-]*S(?P<season>\d+)E(?P<episode>\d+)\s*[_\s-]*(?P<year>\d{4})?",
            // Show Name - Episode 1 (2023) [HBO]
            r"(?i)^(?P<series>.*?)\s*[_\s-]*(?:Episode|Ep|E)?\s*(?P<episode>\d+)\s*\((?P<year>\d{4})\)\s*(?:\[(?P<channel>[^\]]+)\])?",
            // 2023.Show.Name.S01E01.HBO
            r"(?i)^(?P<year>\d{4})\.(?P<series>.*?)\.S(?P<season>\d+)E(?P<episode>\d+)(?:\.(?P<channel>\w+))?$",
            // Movie Name (2023) [HBO]
            r"(?i)^(?P<series>.*?)\s*[(\[]*(?P<year>\d{4})[)\]]*(?:\s*[\[(](?P<channel>[^\])]+)[\])])?$",
            // Show Name E01 2023 HBO
            r"(?i)^(?P<series>.*?)\s*[_\s-]*E(?P<episode>\d+)\s*[_\s-]*(?P<year>\d{4})?\s*[_\s-]*(?P<channel>[\w\s]+)?$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("metadata pattern"))
        .collect()
    })
}

fn year_fallback() -> &'static Regex {
    static YEAR: OnceLock<Regex> = OnceLock::new();
    YEAR.get_or_init(|| Regex::new(r"[(\[]?(\d{4})[)\]]?").expect("year pattern"))
}

fn clean_series(raw: &str) -> Option<String> {
    let cleaned = raw.replace(['.', '_'], " ");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn valid_year(year: i64) -> bool {
    (1900..=2100).contains(&year)
}

/// Parse series/season/episode/year/channel out of a filename. Tries the
/// known naming shapes in order and falls back to pulling out a bare year.
pub fn parse_filename(filename: &str) -> ParsedMetadata {
    let name = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);

    for pattern in patterns() {
        let captures = match pattern.captures(name) {
            Some(c) => c,
            None => continue,
        };
        let mut parsed = ParsedMetadata::default();

        if let Some(series) = captures.name("series") {
            parsed.series = clean_series(series.as_str());
        }
        if let Some(season) = captures.name("season") {
            parsed.season = season.as_str().parse().ok();
        }
        if let Some(episode) = captures.name("episode") {
            let ep = episode.as_str().trim();
            parsed.episode = ep
                .parse::<i64>()
                .map(|n| format!("E{:02}", n))
                .ok()
                .or_else(|| Some(ep.to_string()));
        }
        if let Some(year) = captures.name("year") {
            parsed.year = year.as_str().parse().ok().filter(|y| valid_year(*y));
        }
        if let Some(channel) = captures.name("channel") {
            let channel = channel.as_str().replace('_', " ").trim().to_string();
            if !channel.is_empty() {
                parsed.channel = Some(channel);
            }
        }

        if !parsed.is_empty() {
            return parsed;
        }
    }

    // No structured pattern matched; salvage a year and whatever precedes it.
    let mut parsed = ParsedMetadata::default();
    if let Some(m) = year_fallback().captures(name) {
        if let Ok(year) = m[1].parse::<i64>() {
            if valid_year(year) {
                parsed.year = Some(year);
                let prefix = &name[..m.get(0).unwrap().start()];
                parsed.series = clean_series(prefix);
            }
        }
    }
    parsed
}

/// A parsed value should only land on an empty field unless the caller asked
/// to overwrite.
pub fn should_update<T: Clone>(current: &Option<T>, parsed: &Option<T>, overwrite: bool) -> bool {
    parsed.is_some() && (overwrite || current.is_none())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_sxxexx_format() {
        let parsed = parse_filename("Breaking Bad S01E05 2008 AMC.mp4");
        assert_eq!(parsed.series.as_deref(), Some("Breaking Bad"));
        assert_eq!(parsed.season, Some(1));
        assert_eq!(parsed.episode.as_deref(), Some("E05"));
        assert_eq!(parsed.year, Some(2008));
        assert_eq!(parsed.channel.as_deref(), Some("AMC"));
    }

    #[test]
    fn bracketed_channel_format() {
        let parsed = parse_filename("[HBO] The Wire - S02E03 - 2003.mkv");
        assert_eq!(parsed.channel.as_deref(), Some("HBO"));
        assert_eq!(parsed.series.as_deref(), Some("The Wire"));
        assert_eq!(parsed.season, Some(2));
        assert_eq!(parsed.episode.as_deref(), Some("E03"));
    }

    #[test]
    fn dotted_format() {
        let parsed = parse_filename("2023.Some.Show.S01E01.HBO.mp4");
        assert_eq!(parsed.year, Some(2023));
        assert_eq!(parsed.series.as_deref(), Some("Some Show"));
        assert_eq!(parsed.channel.as_deref(), Some("HBO"));
    }

    #[test]
    fn movie_with_year() {
        let parsed = parse_filename("Great Movie (2019).mp4");
        assert_eq!(parsed.series.as_deref(), Some("Great Movie"));
        assert_eq!(parsed.year, Some(2019));
        assert_eq!(parsed.season, None);
    }

    #[test]
    fn underscored_names_are_cleaned() {
        let parsed = parse_filename("Show_Name_S02E05_2023_HBO.mp4");
        assert_eq!(parsed.series.as_deref(), Some("Show Name"));
        assert_eq!(parsed.season, Some(2));
    }

    #[test]
    fn implausible_years_are_dropped() {
        let parsed = parse_filename("Ancient Clip (1234).mp4");
        assert_eq!(parsed.year, None);
    }

    #[test]
    fn unparseable_name_yields_nothing() {
        let parsed = parse_filename("dsc0001.mp4");
        assert!(parsed.is_empty());
    }

    #[test]
    fn update_predicate_respects_existing_values() {
        assert!(should_update(&None::<String>, &Some("x".to_string()), false));
        assert!(!should_update(&Some("set".to_string()), &Some("x".to_string()), false));
        assert!(should_update(&Some("set".to_string()), &Some("x".to_string()), true));
        assert!(!should_update(&None::<String>, &None, true));
    }
}
