use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use url::Url;

use crate::api::{self, MfaSetup, ShareRequest, UserDetail, UserInfo};
use crate::auth::ACTION_MFA_REQUIRED;
use crate::feed::Container;
use crate::record::VideoRecord;
use crate::storage::Store;

pub trait FeedService: Send + Sync {
    fn load(&self, container: Container) -> Result<Vec<VideoRecord>>;
}

pub trait ShareService: Send + Sync {
    fn share(&self, request: &ShareRequest) -> Result<VideoRecord>;
    fn delete(&self, video_id: &str) -> Result<String>;
}

pub trait AccountService: Send + Sync {
    fn join(&self, email: &str) -> Result<UserInfo>;
    fn verify_mfa(&self, email: &str, otp: &str, session_token: Option<&str>)
        -> Result<UserInfo>;
    fn mfa_setup(&self, email: &str) -> Result<MfaSetup>;
    fn enable_mfa(&self, email: &str, secret: &str, otp: &str) -> Result<()>;
    fn disable_mfa(&self, email: &str, otp: &str) -> Result<()>;
}

pub struct ApiFeedService {
    client: Arc<api::Client>,
}

impl ApiFeedService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for ApiFeedService {
    fn load(&self, container: Container) -> Result<Vec<VideoRecord>> {
        let links = match container {
            Container::Popular => self.client.top_videos(),
            Container::Private => self.client.private_videos(),
        }
        .with_context(|| format!("fetch {container} videos"))?;
        Ok(links.into_iter().map(VideoRecord::from).collect())
    }
}

pub struct ApiShareService {
    client: Arc<api::Client>,
}

impl ApiShareService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl ShareService for ApiShareService {
    fn share(&self, request: &ShareRequest) -> Result<VideoRecord> {
        let link = self.client.share(request).context("share video")?;
        Ok(link.into())
    }

    fn delete(&self, video_id: &str) -> Result<String> {
        self.client.delete_share(video_id).context("delete video")
    }
}

pub struct ApiAccountService {
    client: Arc<api::Client>,
}

impl ApiAccountService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl AccountService for ApiAccountService {
    fn join(&self, email: &str) -> Result<UserInfo> {
        self.client.join(email)
    }

    fn verify_mfa(
        &self,
        email: &str,
        otp: &str,
        session_token: Option<&str>,
    ) -> Result<UserInfo> {
        self.client.verify_mfa(email, otp, session_token)
    }

    fn mfa_setup(&self, email: &str) -> Result<MfaSetup> {
        self.client.mfa_setup(email)
    }

    fn enable_mfa(&self, email: &str, secret: &str, otp: &str) -> Result<()> {
        self.client.enable_mfa(email, secret, otp)
    }

    fn disable_mfa(&self, email: &str, otp: &str) -> Result<()> {
        self.client.disable_mfa(email, otp)
    }
}

/// Offline feeds seeded with sample videos. Shared and deleted videos are
/// kept in memory for the lifetime of the process.
pub struct MockFeedService {
    videos: Arc<Mutex<Vec<VideoRecord>>>,
}

impl Default for MockFeedService {
    fn default() -> Self {
        Self {
            videos: Arc::new(Mutex::new(sample_videos())),
        }
    }
}

impl MockFeedService {
    /// A share service writing into the same in-memory catalogue.
    pub fn share_service(&self, owner: impl Into<String>) -> MockShareService {
        MockShareService {
            videos: Arc::clone(&self.videos),
            owner: owner.into(),
        }
    }
}

impl FeedService for MockFeedService {
    fn load(&self, container: Container) -> Result<Vec<VideoRecord>> {
        let videos = self.videos.lock();
        Ok(videos
            .iter()
            .filter(|video| Container::for_record(video) == container)
            .cloned()
            .collect())
    }
}

pub struct MockShareService {
    videos: Arc<Mutex<Vec<VideoRecord>>>,
    owner: String,
}

impl ShareService for MockShareService {
    fn share(&self, request: &ShareRequest) -> Result<VideoRecord> {
        let Some(embed) = youtube_embed_link(&request.url) else {
            bail!("Invalid YouTube URL");
        };
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(10)
            .map(char::from)
            .collect();
        let title = request
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Shared video".to_string());
        let record = VideoRecord::new(
            id,
            self.owner.clone(),
            title,
            embed,
            request.description.clone().unwrap_or_default(),
            request.is_private.unwrap_or(false),
        );
        self.videos.lock().insert(0, record.clone());
        Ok(record)
    }

    fn delete(&self, video_id: &str) -> Result<String> {
        let mut videos = self.videos.lock();
        let before = videos.len();
        videos.retain(|video| video.id() != video_id);
        if videos.len() == before {
            bail!("Video not found");
        }
        Ok("Deleted".to_string())
    }
}

/// Offline accounts: MFA status lives in the local store and any
/// well-formed code is accepted.
pub struct MockAccountService {
    store: Arc<Store>,
}

impl MockAccountService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl AccountService for MockAccountService {
    fn join(&self, email: &str) -> Result<UserInfo> {
        let email = api::normalize_email(email);
        let mfa_enabled = self.store.user_mfa(&email)?;
        let user = Some(UserDetail {
            email: email.clone(),
            mfa_enabled,
        });
        if mfa_enabled {
            return Ok(UserInfo {
                jwt: None,
                action: Some(ACTION_MFA_REQUIRED.to_string()),
                user,
                session_token: Some(mock_token("session")),
            });
        }
        Ok(UserInfo {
            jwt: Some(mock_token("jwt")),
            action: None,
            user,
            session_token: None,
        })
    }

    fn verify_mfa(
        &self,
        email: &str,
        _otp: &str,
        _session_token: Option<&str>,
    ) -> Result<UserInfo> {
        Ok(UserInfo {
            jwt: Some(mock_token("jwt")),
            action: None,
            user: Some(UserDetail {
                email: api::normalize_email(email),
                mfa_enabled: true,
            }),
            session_token: None,
        })
    }

    fn mfa_setup(&self, _email: &str) -> Result<MfaSetup> {
        Ok(MfaSetup {
            secret: "JBSWY3DPEHPK3PXP".to_string(),
            qr_code: MOCK_QR_PNG.to_string(),
        })
    }

    fn enable_mfa(&self, email: &str, _secret: &str, _otp: &str) -> Result<()> {
        self.store.set_user_mfa(email, true)
    }

    fn disable_mfa(&self, email: &str, _otp: &str) -> Result<()> {
        self.store.set_user_mfa(email, false)
    }
}

// 1x1 transparent PNG.
const MOCK_QR_PNG: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

fn mock_token(kind: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("mock-{kind}-{suffix}")
}

/// Embed link for a YouTube watch, short or embed URL.
pub fn youtube_embed_link(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
    let id = match host {
        "youtu.be" => url.path_segments()?.next().map(str::to_string),
        "youtube.com" => {
            let mut segments = url.path_segments()?;
            match segments.next() {
                Some("watch") => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                Some("embed") | Some("shorts") => segments.next().map(str::to_string),
                _ => None,
            }
        }
        _ => None,
    }?;
    if id.is_empty() {
        return None;
    }
    Some(format!("https://www.youtube.com/embed/{id}"))
}

fn sample_videos() -> Vec<VideoRecord> {
    vec![
        VideoRecord::new(
            "1",
            "nguyenhuuca",
            "Test share",
            "https://www.youtube.com/embed/h_GqRV-SZmU",
            "This is new video",
            false,
        ),
        VideoRecord::new(
            "2",
            "canh",
            "Funny cats compilation",
            "https://www.youtube.com/embed/tMui4IVW0BM",
            "Cats being cats, lol",
            false,
        ),
        VideoRecord::new(
            "3",
            "canh",
            "Test share",
            "https://www.youtube.com/embed/h_GqRV-SZmU",
            "This is new video",
            false,
        ),
        VideoRecord::new(
            "4",
            "canh",
            "Office prank gone wrong",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "",
            false,
        ),
        VideoRecord::new(
            "5",
            "nguyenhuuca",
            "Weekend hike",
            "https://www.youtube.com/embed/aqz-KE-bpKQ",
            "Just for me",
            true,
        ),
    ]
}
