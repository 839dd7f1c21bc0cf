//! End-to-end tests for the hls-gate bridge
//!
//! Starts a real Axum server on a random port in front of a wiremock CDN and
//! walks a player's path: play → master → child → key and segments.

use hls_gate::config::Config;
use hls_gate::server::build_router;
use m3u8_rs::Playlist;
use std::net::SocketAddr;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &[u8; 16] = b"0123456789abcdef";

// ── Test helpers ──────────────────────────────────────────────────────────────

/// Spin up the bridge with its public base URL set to its own address.
async fn start_server(token: Option<&str>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().unwrap();

    let config = Config {
        port: 0,
        base_url: format!("http://{}", addr),
        is_dev: true,
        access_token_header_key: token.map(|_| "X-Auth".to_string()),
        access_token: token.map(str::to_string),
        fetch_timeout_secs: 5,
    };

    let app = build_router(config).await.unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// CDN that only answers requests carrying `X-Auth: abc`.
async fn start_origin() -> MockServer {
    let origin = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/vod/master.m3u8"))
        .and(header("X-Auth", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "#EXTM3U\n\
             #EXT-X-VERSION:3\n\
             #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
             360p/index.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=2400000,RESOLUTION=1280x720\n\
             720p/index.m3u8\n",
        ))
        .mount(&origin)
        .await;

    Mock::given(method("GET"))
        .and(path("/vod/360p/index.m3u8"))
        .and(header("X-Auth", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "#EXTM3U\n\
             #EXT-X-VERSION:3\n\
             #EXT-X-TARGETDURATION:4\n\
             #EXT-X-MEDIA-SEQUENCE:0\n\
             #EXT-X-KEY:METHOD=AES-128,URI=\"/keys/1\"\n\
             #EXTINF:4.0,\n\
             seg0.ts\n\
             #EXTINF:4.0,\n\
             seg1.ts\n\
             #EXT-X-ENDLIST\n",
        ))
        .mount(&origin)
        .await;

    Mock::given(method("GET"))
        .and(path("/keys/1"))
        .and(header("X-Auth", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(KEY.to_vec()))
        .mount(&origin)
        .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(u8::MAX)
        .mount(&origin)
        .await;

    origin
}

/// Client that surfaces redirects instead of following them.
fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

fn location(resp: &reqwest::Response) -> String {
    resp.headers()
        .get("location")
        .expect("redirect without Location")
        .to_str()
        .unwrap()
        .to_string()
}

fn parse(body: &[u8]) -> Playlist {
    m3u8_rs::parse_playlist_res(body).expect("bridge served an invalid playlist")
}

// ── Playback walk ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn authenticated_playback_walk() {
    let origin = start_origin().await;
    let addr = start_server(Some("abc")).await;
    let client = client();

    // Play → bridged master link
    let resp = client
        .get(format!("http://{}/play", addr))
        .query(&[("src", format!("{}/vod/master.m3u8", origin.uri()))])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 302);
    let master_link = location(&resp);
    assert!(master_link.starts_with(&format!("http://{}/load?url=mplp%3A", addr)));

    // Master: both variants point back at the bridge
    let resp = client.get(&master_link).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let master = match parse(&resp.bytes().await.unwrap()) {
        Playlist::MasterPlaylist(pl) => pl,
        Playlist::MediaPlaylist(_) => panic!("expected master playlist"),
    };
    assert_eq!(master.variants.len(), 2);
    for variant in &master.variants {
        assert!(
            variant.uri.starts_with(&format!("http://{}/load?url=cplp%3A", addr)),
            "variant not bridged: {}",
            variant.uri
        );
    }

    // Child: key bridged, segments bridged as redirects
    let resp = client.get(&master.variants[0].uri).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let media = match parse(&resp.bytes().await.unwrap()) {
        Playlist::MediaPlaylist(pl) => pl,
        Playlist::MasterPlaylist(_) => panic!("expected media playlist"),
    };
    assert_eq!(media.segments.len(), 2);
    assert!(media.end_list);

    let key_uri = media.segments[0]
        .key
        .as_ref()
        .and_then(|k| k.uri.clone())
        .expect("segment key");
    assert!(key_uri.starts_with(&format!("http://{}/load?url=ckey%3A", addr)));

    // Key bytes come through untouched
    let resp = client.get(&key_uri).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(&resp.bytes().await.unwrap()[..], &KEY[..]);

    // Segments redirect straight to the CDN
    let resp = client.get(&media.segments[1].uri).send().await.unwrap();
    assert_eq!(resp.status(), 302);
    assert_eq!(location(&resp), format!("{}/vod/360p/seg1.ts", origin.uri()));
}

#[tokio::test]
async fn missing_token_surfaces_as_401() {
    let origin = start_origin().await;
    let addr = start_server(None).await;
    let client = client();

    let resp = client
        .get(format!("http://{}/play", addr))
        .query(&[("src", format!("{}/vod/master.m3u8", origin.uri()))])
        .send()
        .await
        .unwrap();
    let master_link = location(&resp);

    let resp = client.get(&master_link).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let json: serde_json::Value = serde_json::from_slice(&resp.bytes().await.unwrap()).unwrap();
    assert_eq!(json["error"], "fetch_auth");
}

#[tokio::test]
async fn concurrent_loads_are_independent() {
    let origin = start_origin().await;
    let addr = start_server(Some("abc")).await;
    let client = client();

    let key = |n: u32| {
        let real = format!("{}/keys/{}", origin.uri(), n);
        format!(
            "http://{}/load?url={}",
            addr,
            urlencoding::encode(&format!("ckey:{}", urlencoding::encode(&real)))
        )
    };

    let (found, missing) = tokio::join!(
        client.get(key(1)).send(),
        client.get(key(2)).send(),
    );
    assert_eq!(found.unwrap().status(), 200);
    // Unknown keys fall through to the origin's catch-all 401
    assert_eq!(missing.unwrap().status(), 401);

    let health = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    let health: serde_json::Value = serde_json::from_slice(&health).unwrap();
    assert_eq!(health["in_flight"], 0);
}
