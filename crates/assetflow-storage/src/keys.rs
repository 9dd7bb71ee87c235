//! Storage key strategy.
//!
//! Key layout (a wire contract shared by every backend):
//!
//! - original: `org/{orgId}/proj/{projectId}/asset/{assetId}/original/v{version}/{filename}`
//! - rendition: `org/{orgId}/proj/{projectId}/asset/{assetId}/renditions/{renditionName}/{filename}`
//!
//! Generation sanitizes the filename; parsing is the strict inverse and
//! rejects every key generation could not have produced.

use std::fmt::{Display, Formatter, Result as FmtResult};

use assetflow_core::models::RenditionKind;
use uuid::Uuid;

/// Maximum filename length in bytes after sanitization.
pub const MAX_FILENAME_BYTES: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid storage key '{key}': {reason}")]
pub struct KeyError {
    pub key: String,
    pub reason: &'static str,
}

/// What a key points at under an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyTarget {
    Original { version: i32 },
    Rendition { kind: RenditionKind },
}

/// Components of a storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedKey {
    pub organization_id: Uuid,
    pub project_id: Uuid,
    pub asset_id: Uuid,
    pub target: KeyTarget,
    pub filename: String,
}

impl Display for ParsedKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "org/{}/proj/{}/asset/{}/",
            self.organization_id.hyphenated(),
            self.project_id.hyphenated(),
            self.asset_id.hyphenated()
        )?;
        match self.target {
            KeyTarget::Original { version } => write!(f, "original/v{}/", version)?,
            KeyTarget::Rendition { kind } => write!(f, "renditions/{}/", kind.as_str())?,
        }
        f.write_str(&self.filename)
    }
}

/// Replace characters outside `[A-Za-z0-9.\-_]` with `_`, collapse runs of
/// `_` and cap the result at 255 bytes. Names made only of dots become `_`
/// so a key segment can never be `.` or `..`. Total and idempotent.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len().min(MAX_FILENAME_BYTES));
    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    // Output is ASCII, so byte truncation stays on a char boundary
    out.truncate(MAX_FILENAME_BYTES);
    if out.is_empty() || out.chars().all(|c| c == '.') {
        return "_".to_string();
    }
    out
}

pub fn original_key(
    organization_id: Uuid,
    project_id: Uuid,
    asset_id: Uuid,
    version: i32,
    filename: &str,
) -> String {
    ParsedKey {
        organization_id,
        project_id,
        asset_id,
        target: KeyTarget::Original { version },
        filename: sanitize_filename(filename),
    }
    .to_string()
}

pub fn rendition_key(
    organization_id: Uuid,
    project_id: Uuid,
    asset_id: Uuid,
    kind: RenditionKind,
    filename: &str,
) -> String {
    ParsedKey {
        organization_id,
        project_id,
        asset_id,
        target: KeyTarget::Rendition { kind },
        filename: sanitize_filename(filename),
    }
    .to_string()
}

/// Filename every rendition of a kind is stored under.
pub fn rendition_filename(kind: RenditionKind) -> &'static str {
    match kind {
        RenditionKind::ThumbnailSmall => "thumbnail_small.jpg",
        RenditionKind::ThumbnailLarge => "thumbnail_large.jpg",
        RenditionKind::Preview720p => "preview_720p.mp4",
    }
}

fn parse_uuid(segment: &str) -> Option<Uuid> {
    let id = Uuid::parse_str(segment).ok()?;
    // Only the canonical lowercase hyphenated form round-trips
    (id.hyphenated().to_string() == segment).then_some(id)
}

fn parse_version(segment: &str) -> Option<i32> {
    let digits = segment.strip_prefix('v')?;
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    digits.parse::<i32>().ok().filter(|v| *v > 0)
}

pub fn parse_key(key: &str) -> Result<ParsedKey, KeyError> {
    let fail = |reason| KeyError {
        key: key.to_string(),
        reason,
    };

    let segments: Vec<&str> = key.split('/').collect();
    let [org_lit, org, proj_lit, project, asset_lit, asset, section, selector, filename] =
        segments.as_slice()
    else {
        return Err(fail("wrong number of segments"));
    };
    if (*org_lit, *proj_lit, *asset_lit) != ("org", "proj", "asset") {
        return Err(fail("unexpected literal segment"));
    }

    let organization_id = parse_uuid(org).ok_or_else(|| fail("organization id is not a canonical UUID"))?;
    let project_id = parse_uuid(project).ok_or_else(|| fail("project id is not a canonical UUID"))?;
    let asset_id = parse_uuid(asset).ok_or_else(|| fail("asset id is not a canonical UUID"))?;

    let target = match *section {
        "original" => KeyTarget::Original {
            version: parse_version(selector).ok_or_else(|| fail("invalid version segment"))?,
        },
        "renditions" => KeyTarget::Rendition {
            kind: selector
                .parse::<RenditionKind>()
                .map_err(|_| fail("unknown rendition name"))?,
        },
        _ => return Err(fail("unknown key section")),
    };

    if filename.is_empty() || sanitize_filename(filename) != *filename {
        return Err(fail("filename is not sanitized"));
    }

    Ok(ParsedKey {
        organization_id,
        project_id,
        asset_id,
        target,
        filename: filename.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (Uuid, Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn test_original_key_layout() {
        let org = Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap();
        let proj = Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap();
        let asset = Uuid::parse_str("33333333-3333-3333-3333-333333333333").unwrap();
        assert_eq!(
            original_key(org, proj, asset, 1, "My Photo (1).png"),
            "org/11111111-1111-1111-1111-111111111111/proj/22222222-2222-2222-2222-222222222222/asset/33333333-3333-3333-3333-333333333333/original/v1/My_Photo_1_.png"
        );
        assert_eq!(
            rendition_key(org, proj, asset, RenditionKind::Preview720p, "preview_720p.mp4"),
            "org/11111111-1111-1111-1111-111111111111/proj/22222222-2222-2222-2222-222222222222/asset/33333333-3333-3333-3333-333333333333/renditions/preview_720p/preview_720p.mp4"
        );
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("hello world.txt"), "hello_world.txt");
        assert_eq!(sanitize_filename("a///b"), "a_b");
        assert_eq!(sanitize_filename("a__b"), "a_b");
        assert_eq!(sanitize_filename("café.jpg"), "caf_.jpg");
        assert_eq!(sanitize_filename(""), "_");
        assert_eq!(sanitize_filename(".."), "_");
        assert_eq!(sanitize_filename("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_filename(&"x".repeat(300)).len(), MAX_FILENAME_BYTES);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for name in [
            "hello world.txt",
            "",
            "__a__",
            "日本語.png",
            "...",
            "a b c d e f",
            &"é".repeat(200),
        ] {
            let once = sanitize_filename(name);
            assert_eq!(sanitize_filename(&once), once, "not idempotent for {:?}", name);
        }
    }

    #[test]
    fn test_round_trip() {
        let (org, proj, asset) = ids();
        for version in [1, 2, 10, 999] {
            let parsed = ParsedKey {
                organization_id: org,
                project_id: proj,
                asset_id: asset,
                target: KeyTarget::Original { version },
                filename: sanitize_filename("clip final.mov"),
            };
            assert_eq!(parse_key(&parsed.to_string()).unwrap(), parsed);
        }
        for kind in RenditionKind::ALL {
            let key = rendition_key(org, proj, asset, kind, rendition_filename(kind));
            let parsed = parse_key(&key).unwrap();
            assert_eq!(parsed.target, KeyTarget::Rendition { kind });
            assert_eq!(parsed.to_string(), key);
        }
    }

    #[test]
    fn test_parse_rejects_foreign_keys() {
        let (_, proj, asset) = ids();
        let org = Uuid::parse_str("abcdef01-2345-4678-9abc-def012345678").unwrap();
        let valid = original_key(org, proj, asset, 3, "a.png");
        assert!(parse_key(&valid).is_ok());

        let upper = valid.replace(&org.to_string(), &org.to_string().to_uppercase());
        assert!(parse_key(&upper).is_err());
        let simple = valid.replace(&org.to_string(), &org.simple().to_string());
        assert!(parse_key(&simple).is_err());

        assert!(parse_key(&valid.replace("/v3/", "/v03/")).is_err());
        assert!(parse_key(&valid.replace("/v3/", "/v0/")).is_err());
        assert!(parse_key(&valid.replace("/v3/", "/3/")).is_err());
        assert!(parse_key(&valid.replace("/original/", "/originals/")).is_err());
        assert!(parse_key(&valid.replace("a.png", "a b.png")).is_err());
        assert!(parse_key(&valid.replace("a.png", "")).is_err());
        assert!(parse_key(&format!("{}/extra", valid)).is_err());
        assert!(parse_key(&format!("/{}", valid)).is_err());
        assert!(parse_key("media/abc.png").is_err());

        let rendition = rendition_key(org, proj, asset, RenditionKind::ThumbnailSmall, "t.jpg");
        assert!(parse_key(&rendition.replace("thumbnail_small", "thumbnail_huge")).is_err());
    }
}
