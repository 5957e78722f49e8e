//! Ordered heuristics for picking the canonical post link out of newsletter HTML.
//!
//! Rules are plain data so a new provider quirk is one more entry in the list.
//! Every reject rule is applied first, then accept rules are tried in order and
//! the first candidate matching the earliest accept rule wins.

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryHandling {
    Strip,
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Reject,
    Accept(QueryHandling),
}

#[derive(Debug, Clone)]
pub struct UrlRule {
    pub name: &'static str,
    pub action: RuleAction,
    pattern: Regex,
}

impl UrlRule {
    pub fn new(name: &'static str, action: RuleAction, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            action,
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn reject(name: &'static str, pattern: &str) -> Result<Self, regex::Error> {
        Self::new(name, RuleAction::Reject, pattern)
    }

    pub fn accept(name: &'static str, pattern: &str, query: QueryHandling) -> Result<Self, regex::Error> {
        Self::new(name, RuleAction::Accept(query), pattern)
    }

    pub fn matches(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }
}

#[derive(Debug, Clone)]
pub struct UrlRuleSet {
    url_pattern: Regex,
    rules: Vec<UrlRule>,
}

impl UrlRuleSet {
    pub fn empty() -> Result<Self, regex::Error> {
        Ok(Self {
            url_pattern: Regex::new(r#"https?://[^\s"'<>()\[\]{}]+"#)?,
            rules: Vec::new(),
        })
    }

    /// Rules tuned for Substack-style newsletters.
    pub fn newsletter_defaults() -> Result<Self, regex::Error> {
        let mut set = Self::empty()?;
        set.push(UrlRule::reject(
            "cdn",
            r"(?i)^https?://([^/]*\.)?(substackcdn\.com|cloudfront\.net|googleusercontent\.com|cdn\.[^/]+)(/|$)",
        )?);
        set.push(UrlRule::reject(
            "image",
            r"(?i)(\.(png|jpe?g|gif|webp|svg|ico)([?#]|$)|/image/|/img/|/images/)",
        )?);
        set.push(UrlRule::reject(
            "tracking",
            r"(?i)(/open(/|\?|$)|/track/|/o/|/pixel|list-manage\.com|/unsubscribe|/action/disable_email)",
        )?);
        set.push(UrlRule::reject(
            "profile",
            r"(?i)(/profile/|substack\.com/@|/people/\d+)",
        )?);
        set.push(UrlRule::reject("live-stream", r"(?i)(/live-stream|/live/|/lives/)")?);
        set.push(UrlRule::accept(
            "publication-post",
            r"(?i)^https?://[a-z0-9-]+\.[a-z0-9.-]+/p/[a-z0-9%_-]+",
            QueryHandling::Strip,
        )?);
        set.push(UrlRule::accept(
            "app-link-post",
            r"(?i)^https?://([^/]*\.)?substack\.com/app-link/post\?([^#]*&)?post_id=\d+",
            QueryHandling::Keep,
        )?);
        set.push(UrlRule::accept(
            "redirect",
            r"(?i)^https?://([^/]*\.)?substack\.com/redirect/",
            QueryHandling::Keep,
        )?);
        Ok(set)
    }

    pub fn push(&mut self, rule: UrlRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[UrlRule] {
        &self.rules
    }

    /// Every absolute URL in the document, in order of appearance.
    pub fn candidates(&self, html: &str) -> Vec<String> {
        self.url_pattern
            .find_iter(html)
            .map(|m| {
                m.as_str()
                    .replace("&amp;", "&")
                    .trim_end_matches(['.', ',', ';', ':', '!'])
                    .to_string()
            })
            .collect()
    }

    pub fn is_rejected(&self, url: &str) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.action == RuleAction::Reject && rule.matches(url))
    }

    pub fn select(&self, candidates: &[String]) -> Option<String> {
        let allowed: Vec<&String> = candidates.iter().filter(|url| !self.is_rejected(url)).collect();

        self.rules.iter().find_map(|rule| match rule.action {
            RuleAction::Reject => None,
            RuleAction::Accept(query) => allowed
                .iter()
                .find(|url| rule.matches(url))
                .map(|url| normalize(url, query)),
        })
    }

    pub fn select_from_html(&self, html: &str) -> Option<String> {
        self.select(&self.candidates(html))
    }
}

fn normalize(url: &str, query: QueryHandling) -> String {
    match query {
        QueryHandling::Keep => url.to_string(),
        QueryHandling::Strip => url
            .split(['?', '#'])
            .next()
            .unwrap_or(url)
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> UrlRuleSet {
        UrlRuleSet::newsletter_defaults().unwrap()
    }

    #[test]
    fn picks_publication_post_and_strips_query() {
        let html = r#"
            <img src="https://substackcdn.com/image/fetch/w_96/logo.png">
            <a href="https://substack.com/@janedoe">Jane</a>
            <a href="https://janedoe.substack.com/p/why-rust-wins?utm_source=post-email-title&amp;publication_id=1">Read</a>
        "#;
        assert_eq!(
            rules().select_from_html(html).as_deref(),
            Some("https://janedoe.substack.com/p/why-rust-wins")
        );
    }

    #[test]
    fn app_link_keeps_its_query_string() {
        let html = r#"<a href="https://substack.com/app-link/post?publication_id=42&amp;post_id=1234&amp;utm_source=email">Open</a>"#;
        assert_eq!(
            rules().select_from_html(html).as_deref(),
            Some("https://substack.com/app-link/post?publication_id=42&post_id=1234&utm_source=email")
        );
    }

    #[test]
    fn app_link_without_post_id_is_not_a_post() {
        let html = r#"<a href="https://substack.com/app-link/post?publication_id=42">Open</a>"#;
        assert_eq!(rules().select_from_html(html), None);
    }

    #[test]
    fn direct_post_beats_app_link_regardless_of_position() {
        let html = r#"
            <a href="https://substack.com/app-link/post?publication_id=42&amp;post_id=1234">app</a>
            <a href="https://news.example.com/p/hello-world">web</a>
        "#;
        assert_eq!(
            rules().select_from_html(html).as_deref(),
            Some("https://news.example.com/p/hello-world")
        );
    }

    #[test]
    fn falls_back_to_redirect_links() {
        let html = r#"<a href="https://substack.com/redirect/2/eyJlIjoiaHR0cHM6Ly9leGFtcGxlLmNvbSJ9">x</a>"#;
        assert_eq!(
            rules().select_from_html(html).as_deref(),
            Some("https://substack.com/redirect/2/eyJlIjoiaHR0cHM6Ly9leGFtcGxlLmNvbSJ9")
        );
    }

    #[test]
    fn rejected_urls_never_win() {
        let html = r#"
            <a href="https://cdn.example.com/p/not-a-post">cdn</a>
            <a href="https://pub.example.com/live-stream/p/abc">live</a>
            <a href="https://pub.example.com/p/after-the-stream">post</a>
        "#;
        let selected = rules().select_from_html(html);
        assert_eq!(selected.as_deref(), Some("https://pub.example.com/p/after-the-stream"));
    }

    #[test]
    fn nothing_usable_yields_none() {
        let html = r#"<a href="https://example.com/about">About</a> <img src="https://example.com/a.png">"#;
        assert_eq!(rules().select_from_html(html), None);
    }

    #[test]
    fn custom_rules_can_be_appended() {
        let mut set = UrlRuleSet::empty().unwrap();
        set.push(UrlRule::accept("beehiiv", r"^https://[a-z0-9-]+\.beehiiv\.com/p/", QueryHandling::Strip).unwrap());
        let html = r#"<a href="https://daily.beehiiv.com/p/issue-7?ref=mail">x</a>"#;
        assert_eq!(set.select_from_html(html).as_deref(), Some("https://daily.beehiiv.com/p/issue-7"));
        assert_eq!(set.rules().len(), 1);
    }
}
