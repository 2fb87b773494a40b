//! The application contract and `StaticFileApp`, a small file server
//! that exercises it. Path resolution and the traversal guard follow
//! the same DELETE-handler security check this codebase already used
//! elsewhere: canonicalize both the document root and the resolved
//! target, then require the target to stay under the root.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::http::env::RequestEnv;
use crate::http::response::{get_mime_type, Body, Response};

pub trait Application: Send + Sync {
    fn call(&self, env: &mut RequestEnv) -> Response;
}

/// Serves files under `document_root`, computing `Content-Type` from the
/// extension and rejecting any path that escapes the root once
/// canonicalized.
pub struct StaticFileApp {
    document_root: PathBuf,
    index_file: String,
}

impl StaticFileApp {
    pub fn new(document_root: impl Into<PathBuf>) -> Self {
        Self {
            document_root: document_root.into(),
            index_file: "index.html".to_string(),
        }
    }

    fn resolve(&self, path_info: &str) -> Result<PathBuf, u16> {
        let root = self.document_root.canonicalize().map_err(|_| 500u16)?;
        let relative = path_info.trim_start_matches('/');
        let mut candidate = root.join(relative);
        if candidate.is_dir() {
            candidate = candidate.join(&self.index_file);
        }

        let resolved = candidate.canonicalize().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                404u16
            } else {
                403u16
            }
        })?;

        if !resolved.starts_with(&root) {
            return Err(403);
        }
        Ok(resolved)
    }
}

impl Application for StaticFileApp {
    fn call(&self, env: &mut RequestEnv) -> Response {
        if env.get("REQUEST_METHOD") != Some("GET") && env.get("REQUEST_METHOD") != Some("HEAD") {
            return error_response(405);
        }

        let path_info = env.get("PATH_INFO").unwrap_or("/").to_string();
        let resolved = match self.resolve(&path_info) {
            Ok(p) => p,
            Err(code) => return error_response(code),
        };

        let file = match File::open(&resolved) {
            Ok(f) => f,
            Err(_) => return error_response(404),
        };
        let size = file.metadata().map(|m| m.len() as usize).unwrap_or(0);
        let ext = extension_of(&resolved);
        let content_type = get_mime_type(ext.as_deref());

        let mut response = Response::new(200);
        response.set_header("Content-Type", content_type);
        if env.get("REQUEST_METHOD") == Some("HEAD") {
            response.set_header("Content-Length", size.to_string());
        } else {
            response.body = Body::File(file, size);
        }
        response
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

fn error_response(code: u16) -> Response {
    let text = crate::http::response::status_text(code);
    Response::with_text_body(code, "text/plain", format!("{code} {text}").into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::env::BodyInput;
    use crate::http::parser::HttpParser;
    use crate::http::tee_input::TeeInput;
    use std::io::Write;

    fn env_for(method: &str, path: &str) -> RequestEnv {
        let mut p = HttpParser::new(8192);
        p.execute(format!("{method} {path} HTTP/1.1\r\n\r\n").as_bytes()).unwrap();
        RequestEnv::from_parser(&p, "127.0.0.1", BodyInput::Rewindable(TeeInput::new(1024)))
    }

    #[test]
    fn serves_a_file_under_the_document_root() {
        let dir = std::env::temp_dir().join(format!("reforkd-app-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut f = File::create(dir.join("hello.txt")).unwrap();
        f.write_all(b"hi there").unwrap();

        let app = StaticFileApp::new(&dir);
        let mut env = env_for("GET", "/hello.txt");
        let res = app.call(&mut env);
        assert_eq!(res.status_code, 200);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_path_traversal_outside_the_document_root() {
        let dir = std::env::temp_dir().join(format!("reforkd-app-trav-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let app = StaticFileApp::new(&dir);
        let mut env = env_for("GET", "/../../etc/passwd");
        let res = app.call(&mut env);
        assert_ne!(res.status_code, 200);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_404() {
        let dir = std::env::temp_dir().join(format!("reforkd-app-404-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let app = StaticFileApp::new(&dir);
        let mut env = env_for("GET", "/nope.txt");
        let res = app.call(&mut env);
        assert_eq!(res.status_code, 404);
        std::fs::remove_dir_all(&dir).ok();
    }
}
