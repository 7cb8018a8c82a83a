//! Mail addresses and recipient normalization.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A mailbox: an email address with an optional display name.
///
/// Two addresses are equal when their emails are equal. Use
/// [`Address::is_identical`] to compare display names as well.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl Address {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into().trim().to_string(),
            name: None,
        }
    }

    pub fn with_name(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into().trim().to_string(),
            name: Some(name.into()),
        }
    }

    /// Build an address from anything that knows its own mailbox.
    pub fn of<T: HasMailAddress + ?Sized>(recipient: &T) -> Self {
        Self {
            email: recipient.mail_address().trim().to_string(),
            name: recipient.mail_display_name(),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Compare both email and display name.
    pub fn is_identical(&self, other: &Address) -> bool {
        self.email == other.email && self.name == other.name
    }

    /// True when the email matches and, if `name` is given, the display name too.
    pub fn matches(&self, email: &str, name: Option<&str>) -> bool {
        match name {
            None => self.email == email,
            Some(name) => self.email == email && self.name.as_deref() == Some(name),
        }
    }

    fn is_blank(&self) -> bool {
        self.email.is_empty()
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.email == other.email
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.email.hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} <{}>", self.email),
            None => f.write_str(&self.email),
        }
    }
}

/// Capability of a domain object (a user, a contact) that can receive mail.
pub trait HasMailAddress {
    fn mail_address(&self) -> String;

    fn mail_display_name(&self) -> Option<String> {
        None
    }

    /// Locale the recipient prefers to be mailed in, if any.
    fn preferred_locale(&self) -> Option<String> {
        None
    }
}

/// Conversion of the many shapes a recipient argument can take into addresses.
///
/// Implemented for bare emails, `(email, name)` pairs, [`Address`], `&dyn HasMailAddress`
/// and collections of any of these.
pub trait IntoAddresses {
    fn into_addresses(self) -> Vec<Address>;
}

impl IntoAddresses for Address {
    fn into_addresses(self) -> Vec<Address> {
        vec![self]
    }
}

impl IntoAddresses for &Address {
    fn into_addresses(self) -> Vec<Address> {
        vec![self.clone()]
    }
}

impl IntoAddresses for &str {
    fn into_addresses(self) -> Vec<Address> {
        vec![Address::new(self)]
    }
}

impl IntoAddresses for String {
    fn into_addresses(self) -> Vec<Address> {
        vec![Address::new(self)]
    }
}

impl IntoAddresses for &String {
    fn into_addresses(self) -> Vec<Address> {
        vec![Address::new(self.as_str())]
    }
}

impl<E: Into<String>, N: Into<String>> IntoAddresses for (E, N) {
    fn into_addresses(self) -> Vec<Address> {
        vec![Address::with_name(self.0, self.1)]
    }
}

impl IntoAddresses for &dyn HasMailAddress {
    fn into_addresses(self) -> Vec<Address> {
        vec![Address::of(self)]
    }
}

impl<T: IntoAddresses> IntoAddresses for Option<T> {
    fn into_addresses(self) -> Vec<Address> {
        self.map(IntoAddresses::into_addresses).unwrap_or_default()
    }
}

impl<T: IntoAddresses> IntoAddresses for Vec<T> {
    fn into_addresses(self) -> Vec<Address> {
        self.into_iter().flat_map(IntoAddresses::into_addresses).collect()
    }
}

impl<T: IntoAddresses, const N: usize> IntoAddresses for [T; N] {
    fn into_addresses(self) -> Vec<Address> {
        self.into_iter().flat_map(IntoAddresses::into_addresses).collect()
    }
}

impl<T: IntoAddresses + Clone> IntoAddresses for &[T] {
    fn into_addresses(self) -> Vec<Address> {
        self.iter().cloned().flat_map(IntoAddresses::into_addresses).collect()
    }
}

impl IntoAddresses for RecipientList {
    fn into_addresses(self) -> Vec<Address> {
        self.0
    }
}

impl IntoAddresses for &RecipientList {
    fn into_addresses(self) -> Vec<Address> {
        self.0.clone()
    }
}

/// Ordered recipients, unique by email.
///
/// Adding an email that is already present keeps the newest display name: the list is
/// reversed, deduplicated keeping the first hit, then reversed back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientList(Vec<Address>);

impl RecipientList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_addresses(addresses: impl IntoAddresses) -> Self {
        let mut list = Self::new();
        list.extend(addresses);
        list
    }

    /// Append addresses. Blank emails are ignored so a stray `""` never disturbs the
    /// recipients already collected.
    pub fn extend(&mut self, addresses: impl IntoAddresses) {
        let incoming: Vec<Address> = addresses
            .into_addresses()
            .into_iter()
            .filter(|address| !address.is_blank())
            .collect();

        if incoming.is_empty() {
            return;
        }

        self.0.extend(incoming);
        self.0 = dedupe(std::mem::take(&mut self.0));
    }

    /// Drop every recipient and take `addresses` instead.
    pub fn replace(&mut self, addresses: impl IntoAddresses) {
        self.0.clear();
        self.extend(addresses);
    }

    pub fn contains(&self, email: &str, name: Option<&str>) -> bool {
        self.0.iter().any(|address| address.matches(email, name))
    }

    pub fn first(&self) -> Option<&Address> {
        self.0.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Address> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.0
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl<'a> IntoIterator for &'a RecipientList {
    type Item = &'a Address;
    type IntoIter = std::slice::Iter<'a, Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

fn dedupe(addresses: Vec<Address>) -> Vec<Address> {
    let mut seen = HashSet::new();
    let mut kept: Vec<Address> = addresses
        .into_iter()
        .rev()
        .filter(|address| seen.insert(address.email.clone()))
        .collect();
    kept.reverse();
    kept
}
