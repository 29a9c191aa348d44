//-
// Copyright (c) 2026, the pgpst-mailer authors
//
// This file is part of pgpst-mailer.
//
// pgpst-mailer is free software: you can redistribute it and/or modify it
// under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// pgpst-mailer is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with pgpst-mailer. If not, see <http://www.gnu.org/licenses/>.

//! Canonicalisation of mail addresses.
//!
//! Addresses are looked up in the directory by their canonical form, which is
//! produced by `remove_dots(normalize_address(raw))`. Both functions are total
//! and idempotent.

use thiserror::Error;

/// Folds the case of a user name and strips everything that is not a word
/// character or a period.
///
/// Lower-casing uses the full Unicode mapping, after which only ASCII word
/// characters survive. This means that both `I` and `İ` end up as a plain
/// `i`, rather than one of them becoming a dotless `ı` which would then be
/// stripped entirely.
pub fn normalize_username(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .filter(|&c| c.is_ascii_alphanumeric() || '_' == c || '.' == c)
        .collect()
}

/// Normalises the local part of `input` with `normalize_username` and
/// lower-cases the domain.
///
/// If there is no `@`, the whole input is treated as a user name.
pub fn normalize_address(input: &str) -> String {
    match input.split_once('@') {
        Some((local, domain)) => {
            format!("{}@{}", normalize_username(local), domain.to_lowercase())
        },
        None => normalize_username(input),
    }
}

/// Removes all periods from the local part of `input`, so that
/// `first.last@x` and `firstlast@x` name the same mailbox.
///
/// If there is no `@`, all periods are removed.
pub fn remove_dots(input: &str) -> String {
    match input.split_once('@') {
        Some((local, domain)) => format!("{}@{}", local.replace('.', ""), domain),
        None => input.replace('.', ""),
    }
}

/// The canonical key an address is stored under.
pub fn canonical(input: &str) -> String {
    remove_dots(&normalize_address(input))
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Ill-formatted e-mail address")]
pub struct PathError;

/// Extracts the address from an SMTP path of the form `<local@domain>`.
///
/// The path must be wrapped in angle brackets and contain exactly one `@`.
/// Surrounding whitespace is ignored.
pub fn parse_path(input: &str) -> Result<String, PathError> {
    let input = input.trim();
    if input.len() < 3 || !input.starts_with('<') || !input.ends_with('>') {
        return Err(PathError);
    }

    if 1 != input.matches('@').count() {
        return Err(PathError);
    }

    Ok(input[1..input.len() - 1].to_owned())
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn funky_address_is_simplified() {
        let address = normalize_address("P.i.o.T+.r@pGP.St");
        assert_eq!("p.i.o.t.r@pgp.st", address);
        assert_eq!("piotr@pgp.st", remove_dots(&address));
        assert_eq!("piotr@pgp.st", canonical("P.i.o.T+.r@pGP.St"));
    }

    #[test]
    fn dots_removed_without_domain() {
        assert_eq!("hello", remove_dots("he.....llo."));
    }

    #[test]
    fn dots_in_domain_are_kept() {
        assert_eq!("ab@mail.pgp.st", remove_dots("a.b@mail.pgp.st"));
    }

    #[test]
    fn dotted_capital_i_stays_in_ascii() {
        assert_eq!("piotr", normalize_username("PİOTR"));
        assert_eq!("piotr", normalize_username("PIOTR"));
    }

    #[test]
    fn address_without_at_is_a_user_name() {
        assert_eq!("foo.bar", normalize_address("Foo.Bar!"));
    }

    #[test]
    fn path_parsing() {
        assert_eq!(Ok("a@b".to_owned()), parse_path("<a@b>"));
        assert_eq!(Ok("a@b".to_owned()), parse_path("  <a@b> "));
        assert_eq!(Err(PathError), parse_path("<>"));
        assert_eq!(Err(PathError), parse_path("a@b"));
        assert_eq!(Err(PathError), parse_path("<ab>"));
        assert_eq!(Err(PathError), parse_path("<a@b@c>"));
        assert_eq!(Err(PathError), parse_path("<a@b"));
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(input in "\\PC{0,40}") {
            let once = normalize_address(&input);
            prop_assert_eq!(&once, &normalize_address(&once));

            let dotless = remove_dots(&once);
            prop_assert_eq!(&dotless, &remove_dots(&dotless));
        }
    }
}
