//! Connection profiles: load/save simple JSON mapping of profile name -> feed settings
//! Stored under XDG config dir: $XDG_CONFIG_HOME/coldview/profiles.json (fallback ~/.config/coldview/profiles.json)

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, io, path::PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProfileEntry {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileEntry>,
    #[serde(default)]
    pub version: u32,
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("coldview")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coldview")
    }
}

pub fn profiles_path() -> PathBuf {
    config_dir().join("profiles.json")
}

// A missing or unreadable file is treated as empty
pub fn load_profiles() -> ProfilesFile {
    let path = profiles_path();
    match fs::read_to_string(&path) {
        Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable profiles file");
            ProfilesFile::default()
        }),
        Err(_) => ProfilesFile::default(),
    }
}

pub fn save_profiles(p: &ProfilesFile) -> io::Result<()> {
    let path = profiles_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(p)?;
    fs::write(path, data)
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResolveProfile {
    /// Use the provided runtime inputs (not persisted).
    Direct(ProfileEntry),
    /// Loaded from existing profile entry
    Loaded(ProfileEntry),
    /// Should prompt user to select among profile names
    PromptSelect(Vec<String>),
    /// Named profile does not exist and no URL was given
    Unknown(String),
    /// No profile could be resolved (e.g., missing arguments)
    None,
}

pub struct ProfileRequest {
    pub profile_name: Option<String>,
    pub url: Option<String>,
    pub write_url: Option<String>,
    pub csrf_token: Option<String>,
    pub reconnect_ms: Option<u64>,
}

impl ProfileRequest {
    pub fn resolve(self, pf: &ProfilesFile) -> ResolveProfile {
        match (self.url, self.profile_name) {
            // URL given -> direct (maybe later saved by caller); settings the
            // command line leaves out come from the named profile, if any
            (Some(url), name) => {
                let saved = name.as_ref().and_then(|n| pf.profiles.get(n));
                ResolveProfile::Direct(ProfileEntry {
                    url,
                    write_url: self.write_url.or_else(|| saved.and_then(|e| e.write_url.clone())),
                    csrf_token: self.csrf_token.or_else(|| saved.and_then(|e| e.csrf_token.clone())),
                    reconnect_ms: self.reconnect_ms.or_else(|| saved.and_then(|e| e.reconnect_ms)),
                })
            }
            // Only profile name given -> try load, command line overrides win
            (None, Some(name)) => match pf.profiles.get(&name) {
                Some(entry) => ResolveProfile::Loaded(ProfileEntry {
                    url: entry.url.clone(),
                    write_url: self.write_url.or_else(|| entry.write_url.clone()),
                    csrf_token: self.csrf_token.or_else(|| entry.csrf_token.clone()),
                    reconnect_ms: self.reconnect_ms.or(entry.reconnect_ms),
                }),
                None => ResolveProfile::Unknown(name),
            },
            // Nothing provided -> maybe prompt select if profiles exist
            (None, None) => {
                if pf.profiles.is_empty() {
                    ResolveProfile::None
                } else {
                    ResolveProfile::PromptSelect(pf.profiles.keys().cloned().collect())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file() -> ProfilesFile {
        let mut pf = ProfilesFile::default();
        pf.profiles.insert(
            "plant".into(),
            ProfileEntry {
                url: "ws://plant:8000/ws".into(),
                write_url: Some("http://plant:8000/comms/write".into()),
                csrf_token: Some("abc".into()),
                reconnect_ms: None,
            },
        );
        pf
    }

    fn req(profile: Option<&str>, url: Option<&str>) -> ProfileRequest {
        ProfileRequest {
            profile_name: profile.map(str::to_owned),
            url: url.map(str::to_owned),
            write_url: None,
            csrf_token: None,
            reconnect_ms: None,
        }
    }

    #[test]
    fn url_wins() {
        match req(Some("plant"), Some("ws://other/ws")).resolve(&file()) {
            ResolveProfile::Direct(e) => assert_eq!(e.url, "ws://other/ws"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn url_keeps_saved_write_settings() {
        let mut r = req(Some("plant"), Some("ws://plant:8000/ws"));
        r.reconnect_ms = Some(250);
        let expected = ProfileEntry {
            url: "ws://plant:8000/ws".into(),
            write_url: Some("http://plant:8000/comms/write".into()),
            csrf_token: Some("abc".into()),
            reconnect_ms: Some(250),
        };
        assert_eq!(r.resolve(&file()), ResolveProfile::Direct(expected));

        // same URL, nothing on the command line: identical to the stored entry
        let pf = file();
        assert_eq!(
            req(Some("plant"), Some("ws://plant:8000/ws")).resolve(&pf),
            ResolveProfile::Direct(pf.profiles["plant"].clone())
        );

        // without a saved profile only the command line counts
        match req(Some("fresh"), Some("ws://x/ws")).resolve(&pf) {
            ResolveProfile::Direct(e) => {
                assert_eq!(e.write_url, None);
                assert_eq!(e.csrf_token, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn profile_loads_with_overrides() {
        let mut r = req(Some("plant"), None);
        r.csrf_token = Some("override".into());
        match r.resolve(&file()) {
            ResolveProfile::Loaded(e) => {
                assert_eq!(e.url, "ws://plant:8000/ws");
                assert_eq!(e.csrf_token.as_deref(), Some("override"));
                assert_eq!(e.write_url.as_deref(), Some("http://plant:8000/comms/write"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_and_empty() {
        assert_eq!(
            req(Some("nope"), None).resolve(&file()),
            ResolveProfile::Unknown("nope".into())
        );
        assert_eq!(
            req(None, None).resolve(&file()),
            ResolveProfile::PromptSelect(vec!["plant".into()])
        );
        assert_eq!(
            req(None, None).resolve(&ProfilesFile::default()),
            ResolveProfile::None
        );
    }
}
