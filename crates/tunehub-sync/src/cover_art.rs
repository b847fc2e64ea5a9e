use crate::SyncError;
use tunehub_core::{Favorite, TrackInfo};
use url::Url;

/// `{api_base}/proxy?url=<original>`. Album art is loaded through the controller.
pub fn proxy_url(api_base: &Url, original: &str) -> Result<Url, SyncError> {
    let original = original.trim();
    if original.is_empty() {
        return Err(SyncError::InvalidUrl("empty album art reference".to_string()));
    }
    let mut url = api_base.clone();
    url.path_segments_mut()
        .map_err(|_| SyncError::InvalidUrl(format!("{api_base} cannot be a base")))?
        .pop_if_empty()
        .push("proxy");
    url.query_pairs_mut().clear().append_pair("url", original);
    Ok(url)
}

pub fn track_art_url(api_base: &Url, track: &TrackInfo) -> Option<Url> {
    track
        .album_art
        .as_deref()
        .and_then(|original| proxy_url(api_base, original).ok())
}

pub fn favorite_art_url(api_base: &Url, favorite: &Favorite) -> Option<Url> {
    favorite
        .album_art
        .as_deref()
        .and_then(|original| proxy_url(api_base, original).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(raw: &str) -> Url {
        Url::parse(raw).expect("url")
    }

    #[test]
    fn original_url_is_query_encoded() {
        let url = proxy_url(
            &base("http://localhost:8000"),
            "https://img.example/cover 1.jpg?size=300&fmt=jpg",
        )
        .expect("proxy url");
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/proxy?url=https%3A%2F%2Fimg.example%2Fcover+1.jpg%3Fsize%3D300%26fmt%3Djpg"
        );
    }

    #[test]
    fn base_path_is_kept() {
        let url = proxy_url(&base("http://controller:8000/api/"), "http://a/b.png").expect("proxy url");
        assert_eq!(url.path(), "/api/proxy");
        assert_eq!(
            url.query_pairs().next().map(|(_, value)| value.into_owned()),
            Some("http://a/b.png".to_string())
        );
    }

    #[test]
    fn blank_and_unusable_inputs_are_rejected() {
        assert!(proxy_url(&base("http://localhost:8000"), "  ").is_err());
        assert!(proxy_url(&base("mailto:kiosk@example.com"), "http://a/b.png").is_err());
    }

    #[test]
    fn favorites_without_art_have_no_url() {
        let favorite = Favorite {
            name: "SRF 3".to_string(),
            id: "srf3".to_string(),
            description: None,
            album_art: None,
        };
        assert_eq!(favorite_art_url(&base("http://localhost:8000"), &favorite), None);

        let track = TrackInfo {
            album_art: Some("http://a/b.png".to_string()),
            ..TrackInfo::default()
        };
        assert!(track_art_url(&base("http://localhost:8000"), &track).is_some());
    }
}
