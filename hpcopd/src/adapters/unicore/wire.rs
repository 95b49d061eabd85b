// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! JSON bodies exchanged with the UNICORE REST API.

use std::collections::BTreeMap;

use serde::Deserialize;

const CORE_SERVICES: &str = "CoreServices";
const CORE_PATH: &str = "/rest/core";

#[derive(Debug, Deserialize)]
pub struct RegistryListing {
    #[serde(default)]
    pub entries: Vec<RegistryEntry>,
}

#[derive(Debug, Deserialize)]
pub struct RegistryEntry {
    pub href: String,
    #[serde(rename = "type", default)]
    pub service_type: String,
}

impl RegistryListing {
    /// Base URL of `site`. Site names are the path segment in front of
    /// `/rest/core` in each core-services endpoint.
    pub fn site_url(&self, site: &str) -> Option<String> {
        self.entries
            .iter()
            .filter(|entry| entry.service_type == CORE_SERVICES)
            .find(|entry| site_name(&entry.href) == Some(site))
            .map(|entry| entry.href.trim_end_matches('/').to_string())
    }
}

fn site_name(href: &str) -> Option<&str> {
    let (base, _) = href.split_once(CORE_PATH)?;
    base.rsplit('/').next().filter(|name| !name.is_empty())
}

#[derive(Debug, Deserialize)]
pub struct JobProperties {
    pub status: String,
    #[serde(rename = "_links", default)]
    pub links: JobLinks,
}

#[derive(Debug, Default, Deserialize)]
pub struct JobLinks {
    #[serde(rename = "workingDirectory")]
    pub working_directory: Option<Link>,
}

#[derive(Debug, Deserialize)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Deserialize)]
pub struct DirectoryListing {
    #[serde(default)]
    pub content: BTreeMap<String, EntryMeta>,
}

#[derive(Debug, Deserialize)]
pub struct EntryMeta {
    #[serde(rename = "isDirectory", default)]
    pub is_directory: bool,
    pub size: Option<u64>,
}
