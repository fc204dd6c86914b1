// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Parse, render, and wildcard-match device driver paths.
// Author: Lukas Bower

//! Driver path addressing.
//!
//! A driver path names one enumerated device:
//!
//! ```text
//! usb/<vendor>/<product>/<interface>/<serial>[/<device path>]
//! serial@<device path>
//! ```
//!
//! Any field may be left empty to form a partial path. Partial paths cannot
//! be opened, but they match concrete paths under [`DriverPath::matches`],
//! which is how user-supplied selectors filter an enumeration.

use std::fmt;
use std::str::FromStr;

use crate::error::LinkError;

/// USB address fields; empty strings are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsbPath {
    /// Vendor id, rendered as hex text.
    pub vendor: String,
    /// Product id, rendered as hex text.
    pub product: String,
    /// Interface number.
    pub interface: String,
    /// Device serial number.
    pub serial: String,
    /// Optional host device node backing the interface.
    pub devpath: String,
}

/// A parsed device address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DriverPath {
    /// No address; matches everything.
    #[default]
    Empty,
    /// A serial tty address.
    Serial {
        /// Host device node, possibly empty.
        devpath: String,
    },
    /// A USB address.
    Usb(UsbPath),
}

fn fields_agree(a: &str, b: &str) -> bool {
    a.is_empty() || b.is_empty() || a == b
}

impl DriverPath {
    /// Wildcard equality: every field that is non-empty on both sides must
    /// agree. Schemes are fields too, so `Empty` matches anything.
    ///
    /// This relation is reflexive and symmetric but deliberately not
    /// transitive, which is why it is not the `PartialEq` impl.
    #[must_use]
    pub fn matches(&self, other: &DriverPath) -> bool {
        match (self, other) {
            (DriverPath::Empty, _) | (_, DriverPath::Empty) => true,
            (DriverPath::Serial { devpath: a }, DriverPath::Serial { devpath: b }) => {
                fields_agree(a, b)
            }
            (DriverPath::Usb(a), DriverPath::Usb(b)) => {
                fields_agree(&a.vendor, &b.vendor)
                    && fields_agree(&a.product, &b.product)
                    && fields_agree(&a.interface, &b.interface)
                    && fields_agree(&a.serial, &b.serial)
                    && fields_agree(&a.devpath, &b.devpath)
            }
            _ => false,
        }
    }

    /// Whether any field that is required to open a device is missing.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        match self {
            DriverPath::Empty => true,
            DriverPath::Serial { devpath } => devpath.is_empty(),
            DriverPath::Usb(usb) => {
                usb.vendor.is_empty()
                    || usb.product.is_empty()
                    || usb.interface.is_empty()
                    || usb.serial.is_empty()
            }
        }
    }
}

impl FromStr for DriverPath {
    type Err = LinkError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(DriverPath::Empty);
        }
        if let Some(devpath) = input.strip_prefix("serial@") {
            return Ok(DriverPath::Serial {
                devpath: devpath.to_string(),
            });
        }
        if input == "serial" {
            return Ok(DriverPath::Serial {
                devpath: String::new(),
            });
        }
        if let Some(rest) = input.strip_prefix("usb") {
            let rest = rest.strip_prefix('@').or_else(|| rest.strip_prefix('/')).unwrap_or(rest);
            if !rest.is_empty() && !input.starts_with("usb/") && !input.starts_with("usb@") {
                return Err(LinkError::invalid_argument("driver path scheme"));
            }
            let mut fields = rest.splitn(5, '/');
            let mut next = || fields.next().unwrap_or("").to_string();
            return Ok(DriverPath::Usb(UsbPath {
                vendor: next(),
                product: next(),
                interface: next(),
                serial: next(),
                devpath: next(),
            }));
        }
        Err(LinkError::invalid_argument("driver path scheme"))
    }
}

impl fmt::Display for DriverPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverPath::Empty => Ok(()),
            DriverPath::Serial { devpath } => write!(f, "serial@{devpath}"),
            DriverPath::Usb(usb) => {
                let fields = [
                    usb.vendor.as_str(),
                    usb.product.as_str(),
                    usb.interface.as_str(),
                    usb.serial.as_str(),
                    usb.devpath.as_str(),
                ];
                let keep = fields
                    .iter()
                    .rposition(|field| !field.is_empty())
                    .map_or(0, |index| index + 1);
                write!(f, "usb")?;
                for field in &fields[..keep] {
                    write!(f, "/{field}")?;
                }
                Ok(())
            }
        }
    }
}
