//! Ordered selector alternatives for the schedule page.
//!
//! The site's markup carries no stability promise. Each lookup walks its list
//! in order and the first selector that resolves wins, so a redesign usually
//! needs one new entry here instead of a code change.

#[derive(Clone, Debug)]
pub struct SelectorSet {
    pub city: Vec<String>,
    pub street: Vec<String>,
    pub house: Vec<String>,
    /// Autocomplete suggestion items shown under the focused field.
    pub suggestions: Vec<String>,
    pub submit: Vec<String>,
    pub result: Vec<String>,
    /// Candidate schedule containers for the static backend, most specific first.
    pub static_containers: Vec<String>,
    /// Lowercase phrases the site prints when an address has no schedule.
    pub not_found_markers: Vec<String>,
    /// Lowercase phrases of a site-side failure. The check is retried, never
    /// recorded as an empty schedule.
    pub error_markers: Vec<String>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            city: owned(&["input#city.form__input", "input#city", "input[name='city']"]),
            street: owned(&[
                "input#street.form__input",
                "input#street",
                "input[name='street']",
            ]),
            house: owned(&[
                "input#house_num.form__input",
                "input#house_num",
                "input[name='house_num']",
            ]),
            suggestions: owned(&[".autocomplete-items div", ".autocomplete-items > *"]),
            submit: owned(&["button[type='submit']", ".btn-submit", "button.form__submit"]),
            result: owned(&[".discon-schedule-table", "#discon-fact"]),
            static_containers: owned(&[
                "[class*='schedule']",
                "[id*='schedule']",
                "[class*='shutdown']",
                "[id*='shutdown']",
                ".result",
                ".outage-list",
                ".table",
                ".card",
            ]),
            not_found_markers: owned(&["не знайдено"]),
            error_markers: owned(&["помилка"]),
        }
    }
}

impl SelectorSet {
    /// The first error marker found in `text`, compared case-insensitively.
    pub fn error_marker_in(&self, text: &str) -> Option<&str> {
        let text = text.to_lowercase();
        self.error_markers
            .iter()
            .find(|marker| text.contains(&marker.to_lowercase()))
            .map(String::as_str)
    }

    /// The field selector lists in form order, paired with a name for errors.
    pub fn fields(&self) -> [(&'static str, &[String]); 3] {
        [
            ("city", &self.city),
            ("street", &self.street),
            ("house", &self.house),
        ]
    }
}
