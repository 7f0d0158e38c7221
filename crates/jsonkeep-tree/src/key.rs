use std::borrow::Cow;
use std::fmt;

/// Address of a slot inside a container.
///
/// Objects are addressed by name and arrays by position, but either form is
/// accepted by both kinds: a `Name` in canonical decimal form (`"0"`, `"17"`,
/// never `"07"`) addresses an array slot, and an `Index` addresses an object
/// member by its decimal rendering.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// Object member name.
    Name(String),
    /// Array position.
    Index(usize),
}

impl Key {
    /// The array position this key addresses, if any.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(index) => Some(*index),
            Key::Name(name) => parse_index(name),
        }
    }

    /// The object member name this key addresses.
    pub fn as_name(&self) -> Cow<'_, str> {
        match self {
            Key::Name(name) => Cow::Borrowed(name),
            Key::Index(index) => Cow::Owned(index.to_string()),
        }
    }

    /// Split a dot-separated path (`"users.0.name"`) into keys.
    ///
    /// Segments that look like array positions become [`Key::Index`]. An empty
    /// path yields no keys and addresses the root.
    pub fn path(path: &str) -> Vec<Key> {
        if path.is_empty() {
            return Vec::new();
        }
        path.split('.')
            .map(|segment| match parse_index(segment) {
                Some(index) => Key::Index(index),
                None => Key::Name(segment.to_string()),
            })
            .collect()
    }
}

/// Parse a canonical unsigned decimal: no sign, no leading zeros.
fn parse_index(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    if bytes.len() > 1 && bytes[0] == b'0' {
        return None;
    }
    text.parse().ok()
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => f.write_str(name),
            Key::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}

impl From<&String> for Key {
    fn from(name: &String) -> Self {
        Key::Name(name.clone())
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}
