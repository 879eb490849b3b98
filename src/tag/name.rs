//! Tag-name escaping for URL path segments.
//!
//! The archive cannot serve `/`, `&`, `.` or `?` literally inside a tag path
//! segment, so tag pages use `*s*`, `*a*`, `*d*` and `*q*` stand-ins before
//! ordinary percent-encoding. Display names (the cache identity) never carry
//! the escaped forms.

/// Characters the archive escapes inside tag path segments.
const ESCAPES: [(char, &str); 4] = [('/', "*s*"), ('&', "*a*"), ('.', "*d*"), ('?', "*q*")];

/// Converts a display name into the escaped, percent-encoded path segment
/// used in tag page URLs.
///
/// # Examples
///
/// ```
/// use fanarchive::url_component_from_name;
///
/// assert_eq!(url_component_from_name("Fluff"), "Fluff");
/// assert_eq!(url_component_from_name("Hurt/Comfort"), "Hurt*s*Comfort");
/// assert_eq!(url_component_from_name("Angst & Feels"), "Angst%20*a*%20Feels");
/// ```
#[must_use]
pub fn url_component_from_name(name: &str) -> String {
    let mut escaped = name.to_string();
    for (ch, stand_in) in ESCAPES {
        escaped = escaped.replace(ch, stand_in);
    }
    // The archive keeps the '*' of the stand-ins literal in its URLs, so
    // undo the percent-encoding for that one character.
    urlencoding::encode(&escaped).replace("%2A", "*")
}

/// Recovers a display name from an escaped path segment (e.g. from an href).
#[must_use]
pub fn name_from_url_component(component: &str) -> String {
    let decoded = urlencoding::decode(component)
        .map_or_else(|_| component.to_string(), std::borrow::Cow::into_owned);
    let mut name = decoded;
    for (ch, stand_in) in ESCAPES {
        name = name.replace(stand_in, &ch.to_string());
    }
    name
}
