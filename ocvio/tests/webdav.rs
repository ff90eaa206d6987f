//! Integration tests driving the backend against an in-process server.
//!
//! Each test scripts the server's answers and asserts both what the
//! backend reported to the caller and what actually went over the wire.

use std::convert::Infallible;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use tokio::io::AsyncReadExt;

use ocdav::dates::format_http_date;
use ocvio::base::{OpenFlags, Progress, PropertyValue, Transfer, Vio};
use ocvio::{ErrorKind, WebdavVio};

struct Recorded {
    method: String,
    path: String,
    headers: http::HeaderMap,
    body: Vec<u8>,
}

type Handler = Arc<dyn Fn(&Recorded) -> Response<Body> + Send + Sync>;
type RequestLog = Arc<Mutex<Vec<Recorded>>>;

/// Binds a scripted server and returns its `owncloud://` base URL plus the
/// log of everything it received.
async fn serve(handler: Handler) -> (String, RequestLog) {
    let log: RequestLog = Arc::new(Mutex::new(Vec::new()));
    let log_for_service = Arc::clone(&log);

    let make = make_service_fn(move |_| {
        let handler = Arc::clone(&handler);
        let log = Arc::clone(&log_for_service);
        async move {
            Ok::<_, Infallible>(service_fn(move |request: Request<Body>| {
                let handler = Arc::clone(&handler);
                let log = Arc::clone(&log);
                async move {
                    let (head, body) = request.into_parts();
                    let body = hyper::body::to_bytes(body).await.unwrap().to_vec();
                    let recorded = Recorded {
                        method: head.method.to_string(),
                        path: head.uri.path().to_string(),
                        headers: head.headers,
                        body,
                    };
                    let response = handler(&recorded);
                    log.lock().unwrap().push(recorded);
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make);
    let addr = server.local_addr();
    tokio::spawn(server);

    (format!("owncloud://127.0.0.1:{}", addr.port()), log)
}

fn now_epoch() -> i64 {
    i64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs(),
    )
    .unwrap()
}

fn collection_entry(href: &str, mtime: &str, etag: &str) -> String {
    format!(
        r#"<d:response><d:href>{href}</d:href><d:propstat><d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
        <d:getlastmodified>{mtime}</d:getlastmodified>
        <d:getetag>"{etag}"</d:getetag>
        </d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>"#
    )
}

fn file_entry(href: &str, size: u64, mtime: &str, etag: &str) -> String {
    format!(
        r#"<d:response><d:href>{href}</d:href><d:propstat><d:prop>
        <d:resourcetype/>
        <d:getcontentlength>{size}</d:getcontentlength>
        <d:getlastmodified>{mtime}</d:getlastmodified>
        <d:getetag>"{etag}"</d:getetag>
        </d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>"#
    )
}

fn multistatus(entries: &[String]) -> String {
    format!(
        r#"<?xml version="1.0"?><d:multistatus xmlns:d="DAV:">{}</d:multistatus>"#,
        entries.join("")
    )
}

fn xml_response(body: String) -> Response<Body> {
    xml_response_dated(body, now_epoch())
}

fn xml_response_dated(body: String, date: i64) -> Response<Body> {
    Response::builder()
        .status(207)
        .header("Content-Type", "application/xml; charset=utf-8")
        .header("Date", format_http_date(date))
        .body(Body::from(body))
        .unwrap()
}

fn status_response(status: u16) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .unwrap()
}

/// Creates a scratch file with `payload` and reopens it read-only, so the
/// cursor sits at the start like a descriptor handed over by the engine.
async fn scratch_file(dir: &tempfile::TempDir, payload: &[u8]) -> tokio::fs::File {
    let path = dir.path().join("scratch");
    std::fs::write(&path, payload).unwrap();
    tokio::fs::File::open(&path).await.unwrap()
}

#[tokio::test]
async fn test_fresh_upload() {
    let mtime = "Sun, 06 Nov 1994 08:49:37 GMT";
    let handler: Handler = Arc::new(move |request| {
        match (request.method.as_str(), request.path.as_str()) {
            ("PROPFIND", "/sync/") => {
                xml_response(multistatus(&[collection_entry("/sync/", mtime, "d1")]))
            }
            ("PUT", "/sync/a.txt") => status_response(201),
            ("PROPFIND", "/sync/a.txt") => {
                xml_response(multistatus(&[file_entry("/sync/a.txt", 1024, mtime, "abc")]))
            }
            _ => status_response(500),
        }
    });
    let (base, log) = serve(handler).await;

    let dir = tempfile::tempdir().unwrap();
    let mut source = scratch_file(&dir, &[0x61; 1024]).await;

    let mut vio = WebdavVio::new(None);
    let url = format!("{base}/sync/a.txt");
    let mut handle = vio
        .open(&url, OpenFlags::CREATE | OpenFlags::WRITE_ONLY)
        .await
        .unwrap();

    let outcome = vio.sendfile(&mut source, &mut handle).await.unwrap();
    assert_eq!(outcome, Transfer::Complete);
    vio.close(handle).unwrap();

    // Closing an upload drops cached listings; this stat asks the server.
    let stat = vio.stat(&url).await.unwrap();
    assert_eq!(stat.size, Some(1024));
    assert_eq!(stat.file_id.as_deref(), Some("abc"));

    let log = log.lock().unwrap();
    let put = log.iter().find(|r| r.method == "PUT").unwrap();
    assert_eq!(put.body.len(), 1024);
    assert_eq!(put.headers["content-length"], "1024");
    assert!(put.headers["user-agent"]
        .to_str()
        .unwrap()
        .starts_with("csyncoC/"));
    // The parent preflight, the upload and the final stat.
    assert_eq!(log.len(), 3);
}

#[tokio::test]
async fn test_directory_listing_skips_the_collection_itself() {
    let mtime = "Sun, 06 Nov 1994 08:49:37 GMT";
    let handler: Handler = Arc::new(move |request| {
        match (request.method.as_str(), request.path.as_str()) {
            ("PROPFIND", "/sync/") => xml_response(multistatus(&[
                collection_entry("/sync/", mtime, "d1"),
                file_entry("/sync/a.txt", 1024, mtime, "abc"),
            ])),
            _ => status_response(500),
        }
    });
    let (base, log) = serve(handler).await;

    let mut vio = WebdavVio::new(None);
    let mut handle = vio.opendir(&format!("{base}/sync/")).await.unwrap();

    let entry = vio.readdir(&mut handle).unwrap();
    assert_eq!(entry.name, "a.txt");
    assert_eq!(entry.size, Some(1024));
    assert_eq!(entry.file_id.as_deref(), Some("abc"));
    assert_eq!(vio.readdir(&mut handle), None);
    vio.closedir(handle).unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log[0].headers["depth"], "1");
    assert_eq!(
        log[0].headers["content-type"],
        "application/xml; charset=utf-8"
    );
}

#[tokio::test]
async fn test_repeated_listing_is_served_from_cache() {
    let mtime = "Sun, 06 Nov 1994 08:49:37 GMT";
    let handler: Handler = Arc::new(move |request| {
        match (request.method.as_str(), request.path.as_str()) {
            ("PROPFIND", "/sync/") => {
                xml_response(multistatus(&[collection_entry("/sync/", mtime, "d1")]))
            }
            _ => status_response(500),
        }
    });
    let (base, log) = serve(handler).await;

    let mut vio = WebdavVio::new(None);
    let url = format!("{base}/sync/");
    let first = vio.opendir(&url).await.unwrap();
    let second = vio.opendir(&url).await.unwrap();
    vio.closedir(first).unwrap();
    vio.closedir(second).unwrap();

    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rename_moves_with_destination_header() {
    let handler: Handler = Arc::new(|request| {
        match (request.method.as_str(), request.path.as_str()) {
            ("MOVE", "/sync/a.txt") => status_response(201),
            _ => status_response(500),
        }
    });
    let (base, log) = serve(handler).await;

    let mut vio = WebdavVio::new(None);
    vio.rename(
        &format!("{base}/sync/a.txt"),
        &format!("{base}/sync/b f.txt"),
    )
    .await
    .unwrap();

    let log = log.lock().unwrap();
    let destination = log[0].headers["destination"].to_str().unwrap();
    assert_eq!(
        destination,
        format!("{}/sync/b%20f.txt", base.replace("owncloud", "http"))
    );
    assert_eq!(log[0].headers["overwrite"], "T");
}

#[tokio::test]
async fn test_server_clock_skew_translates_mtimes() {
    let mtime = "Sun, 06 Nov 1994 08:49:07 GMT";
    let mtime_epoch = 784_111_747_i64;
    let handler: Handler = Arc::new(move |request| {
        match (request.method.as_str(), request.path.as_str()) {
            ("PROPFIND", "/sync/a.txt") => xml_response_dated(
                multistatus(&[file_entry("/sync/a.txt", 10, mtime, "abc")]),
                now_epoch() + 60,
            ),
            _ => status_response(500),
        }
    });
    let (base, _log) = serve(handler).await;

    let mut vio = WebdavVio::new(None);
    let stat = vio.stat(&format!("{base}/sync/a.txt")).await.unwrap();

    // The server runs sixty seconds ahead; its timestamps come back
    // translated onto the local clock. Allow a little slack for the
    // wall-clock reads on both sides.
    let translated = stat.mtime.unwrap();
    assert!(
        (mtime_epoch - 62..=mtime_epoch - 58).contains(&translated),
        "translated mtime was {translated}, expected about {}",
        mtime_epoch - 60
    );
}

#[tokio::test]
async fn test_gzip_download_writes_decoded_bytes() {
    let payload = vec![0x2a_u8; 3072];
    let gzipped = {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&payload).unwrap();
        encoder.finish().unwrap()
    };
    assert_ne!(gzipped.len(), payload.len());

    let handler: Handler = Arc::new(move |request| {
        match (request.method.as_str(), request.path.as_str()) {
            ("GET", "/sync/blob.bin") => Response::builder()
                .status(200)
                .header("Content-Encoding", "gzip")
                .header("ETag", "\"zzz\"")
                .body(Body::from(gzipped.clone()))
                .unwrap(),
            _ => status_response(500),
        }
    });
    let (base, log) = serve(handler).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("download");
    let mut dest = tokio::fs::File::create(&path).await.unwrap();

    let mut vio = WebdavVio::new(None);
    let url = format!("{base}/sync/blob.bin");
    let mut handle = vio.open(&url, OpenFlags::READ_ONLY).await.unwrap();

    let outcome = vio.sendfile(&mut dest, &mut handle).await.unwrap();
    assert_eq!(outcome, Transfer::Complete);
    vio.close(handle).unwrap();

    let mut written = Vec::new();
    tokio::fs::File::open(&path)
        .await
        .unwrap()
        .read_to_end(&mut written)
        .await
        .unwrap();
    assert_eq!(written, payload);

    // The download's etag answers the id lookup without another request.
    assert_eq!(vio.file_id(&url).await.unwrap(), "zzz");
    assert_eq!(log.lock().unwrap().len(), 1);

    let log = log.lock().unwrap();
    assert_eq!(log[0].headers["accept-encoding"], "gzip");
}

#[tokio::test]
async fn test_full_server_is_a_soft_failure() {
    let mtime = "Sun, 06 Nov 1994 08:49:37 GMT";
    let handler: Handler = Arc::new(move |request| {
        match (request.method.as_str(), request.path.as_str()) {
            ("PROPFIND", "/sync/") => {
                xml_response(multistatus(&[collection_entry("/sync/", mtime, "d1")]))
            }
            ("PUT", "/sync/big.txt") => status_response(507),
            ("PUT", "/sync/ok.txt") => status_response(201),
            _ => status_response(500),
        }
    });
    let (base, _log) = serve(handler).await;

    let events: Arc<Mutex<Vec<(String, Progress)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    let mut vio = WebdavVio::new(None);
    vio.set_property(
        "progress_callback",
        PropertyValue::Progress(Arc::new(move |url, event| {
            sink.lock().unwrap().push((url.to_string(), event.clone()));
        })),
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();

    let url = format!("{base}/sync/big.txt");
    let mut source = scratch_file(&dir, b"0123456789").await;
    let mut handle = vio.creat(&url).await.unwrap();
    let outcome = vio.sendfile(&mut source, &mut handle).await.unwrap();
    assert_eq!(outcome, Transfer::Skipped { status: 507 });
    vio.close(handle).unwrap();
    assert!(vio.error_string().unwrap().starts_with("507"));

    // The session survives a per-file failure; the next upload succeeds.
    let url = format!("{base}/sync/ok.txt");
    let mut source = scratch_file(&dir, b"fine").await;
    let mut handle = vio.creat(&url).await.unwrap();
    let outcome = vio.sendfile(&mut source, &mut handle).await.unwrap();
    assert_eq!(outcome, Transfer::Complete);
    vio.close(handle).unwrap();

    let events = events.lock().unwrap();
    assert!(events.iter().any(|(url, event)| {
        url.ends_with("/sync/big.txt")
            && matches!(event, Progress::Error { status: 507, .. })
    }));
    assert!(events.iter().any(|(url, event)| {
        url.ends_with("/sync/ok.txt") && *event == Progress::FinishedUpload
    }));
}

#[tokio::test]
async fn test_mkdir_twice_reports_an_existing_collection() {
    let created = Arc::new(Mutex::new(false));
    let handler: Handler = Arc::new(move |request| {
        match (request.method.as_str(), request.path.as_str()) {
            ("MKCOL", "/sync/new/") => {
                let mut created = created.lock().unwrap();
                if *created {
                    status_response(405)
                } else {
                    *created = true;
                    status_response(201)
                }
            }
            _ => status_response(500),
        }
    });
    let (base, log) = serve(handler).await;

    let mut vio = WebdavVio::new(None);
    let url = format!("{base}/sync/new");
    vio.mkdir(&url).await.unwrap();
    let error = vio.mkdir(&url).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::AlreadyExists);

    // The request path carries the trailing slash either way.
    assert_eq!(log.lock().unwrap()[0].path, "/sync/new/");
}

#[tokio::test]
async fn test_remove_then_stat_reports_no_entity() {
    let handler: Handler = Arc::new(|request| {
        match (request.method.as_str(), request.path.as_str()) {
            ("DELETE", "/sync/gone/") => status_response(204),
            ("PROPFIND", "/sync/gone/") => status_response(404),
            _ => status_response(500),
        }
    });
    let (base, _log) = serve(handler).await;

    let mut vio = WebdavVio::new(None);
    let url = format!("{base}/sync/gone/");
    vio.rmdir(&url).await.unwrap();

    let error = vio.stat(&url).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NoSuchEntity);
}

#[tokio::test]
async fn test_locked_entries_are_access_denied() {
    let handler: Handler = Arc::new(|_| status_response(423));
    let (base, _log) = serve(handler).await;

    let mut vio = WebdavVio::new(None);
    let error = vio.opendir(&format!("{base}/sync/")).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::AccessDenied);
}

#[tokio::test]
async fn test_non_xml_listing_is_wrong_content() {
    let handler: Handler = Arc::new(|_| {
        Response::builder()
            .status(207)
            .header("Content-Type", "text/html")
            .body(Body::from("<html>database is gone</html>"))
            .unwrap()
    });
    let (base, _log) = serve(handler).await;

    let mut vio = WebdavVio::new(None);
    let error = vio.opendir(&format!("{base}/sync/")).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::WrongContent);
    assert!(vio.error_string().unwrap().contains("not XML"));
}

#[tokio::test]
async fn test_utimes_sets_lastmodified() {
    let handler: Handler = Arc::new(|request| {
        match (request.method.as_str(), request.path.as_str()) {
            ("PROPPATCH", "/sync/a.txt") => xml_response(
                r#"<?xml version="1.0"?><d:multistatus xmlns:d="DAV:">
                <d:response><d:href>/sync/a.txt</d:href>
                <d:propstat><d:prop><d:lastmodified/></d:prop>
                <d:status>HTTP/1.1 200 OK</d:status></d:propstat>
                </d:response></d:multistatus>"#
                    .to_string(),
            ),
            _ => status_response(500),
        }
    });
    let (base, log) = serve(handler).await;

    let mut vio = WebdavVio::new(None);
    vio.utimes(&format!("{base}/sync/a.txt"), 0, 784_111_747)
        .await
        .unwrap();

    let log = log.lock().unwrap();
    let body = String::from_utf8(log[0].body.clone()).unwrap();
    assert!(body.contains("<lastmodified"));
    assert!(body.contains("784111747"));
}

#[tokio::test]
async fn test_utimes_surfaces_failures() {
    let handler: Handler = Arc::new(|_| status_response(409));
    let (base, _log) = serve(handler).await;

    let mut vio = WebdavVio::new(None);
    let error = vio
        .utimes(&format!("{base}/sync/a.txt"), 0, 784_111_747)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn test_unlink_swallows_server_errors() {
    let handler: Handler = Arc::new(|request| {
        match (request.method.as_str(), request.path.as_str()) {
            ("DELETE", _) => status_response(500),
            _ => status_response(500),
        }
    });
    let (base, log) = serve(handler).await;

    let mut vio = WebdavVio::new(None);
    vio.unlink(&format!("{base}/sync/a.txt")).await.unwrap();
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_session_cookie_is_replayed() {
    let mtime = "Sun, 06 Nov 1994 08:49:37 GMT";
    let handler: Handler = Arc::new(move |request| {
        match (request.method.as_str(), request.path.as_str()) {
            ("PROPFIND", "/a/") => {
                let mut response =
                    xml_response(multistatus(&[collection_entry("/a/", mtime, "d1")]));
                response.headers_mut().insert(
                    http::header::SET_COOKIE,
                    http::HeaderValue::from_static(
                        "50ace6bd8a669=p537brtt048jh8srlp2tuep7em95nh9u98mj992fbqc47d1aecp1; path=/",
                    ),
                );
                response
            }
            ("PROPFIND", "/b/") => {
                xml_response(multistatus(&[collection_entry("/b/", mtime, "d2")]))
            }
            _ => status_response(500),
        }
    });
    let (base, log) = serve(handler).await;

    let mut vio = WebdavVio::new(None);
    let first = vio.opendir(&format!("{base}/a/")).await.unwrap();
    vio.closedir(first).unwrap();
    let second = vio.opendir(&format!("{base}/b/")).await.unwrap();
    vio.closedir(second).unwrap();

    let log = log.lock().unwrap();
    assert!(log[0].headers.get("cookie").is_none());
    assert_eq!(
        log[1].headers["cookie"],
        "50ace6bd8a669=p537brtt048jh8srlp2tuep7em95nh9u98mj992fbqc47d1aecp1"
    );
}

#[tokio::test]
async fn test_chmod_and_chown_are_noops_and_lseek_is_not_supported() {
    let mut vio = WebdavVio::new(None);
    vio.chmod("owncloud://example.com/a", 0o644).unwrap();
    vio.chown("owncloud://example.com/a", 0, 0).unwrap();

    let handler: Handler = Arc::new(|_| status_response(500));
    let (base, _log) = serve(handler).await;
    // lseek needs a handle, which needs an open; a GET open is local-only.
    let mut handle = vio
        .open(&format!("{base}/a"), OpenFlags::READ_ONLY)
        .await
        .unwrap();
    assert_eq!(
        vio.lseek(&mut handle, 10).unwrap_err().kind(),
        ErrorKind::Unsupported
    );
    assert_eq!(vio.read(&mut handle, &mut [0; 8]).unwrap(), 0);
    assert_eq!(vio.write(&mut handle, &[0; 8]).unwrap(), 0);
}
