// mockssh Utils
//
// 공통 유틸 함수 모음
// - permission_str  : unix permission bits → "drwxr-xr-x" 문자열
// - mtime_str       : unix timestamp → ls -la 스타일 날짜 문자열
// - long_name       : SFTP readdir용 ls -l 한 줄
// - normalize_path  : 요청 경로 → 루트 기준 정규화 경로 (.. 로 루트 밖으로 못 나감)
// - exit_code       : 프로세스 종료 상태 → SSH exit-status 값

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Datelike, Local, LocalResult, TimeZone, Timelike, Utc};

// ── 포맷 유틸 ────────────────────────────────────────────────────────────────

/// unix permission bits → "drwxr-xr-x" 형식 문자열
pub fn permission_str(p: u32) -> String {
    let file_type = match p & 0o170000 {
        0o040000 => 'd',  // S_IFDIR
        0o120000 => 'l',  // S_IFLNK
        0o060000 => 'b',  // S_IFBLK
        0o020000 => 'c',  // S_IFCHR
        0o010000 => 'p',  // S_IFIFO
        0o140000 => 's',  // S_IFSOCK
        _        => '-',  // S_IFREG or unknown
    };

    const BITS: [(u32, char); 9] = [
        (0o400, 'r'), (0o200, 'w'), (0o100, 'x'),  // owner
        (0o040, 'r'), (0o020, 'w'), (0o010, 'x'),  // group
        (0o004, 'r'), (0o002, 'w'), (0o001, 'x'),  // other
    ];

    let mut s = String::with_capacity(10);
    s.push(file_type);
    for (bit, ch) in BITS {
        s.push(if p & bit != 0 { ch } else { '-' });
    }
    s
}

/// unix timestamp → ls -la 스타일 날짜 문자열
///
/// - 현재 기준 6개월 이내: "Jun 22 15:30"
/// - 그 이상:             "Jun 22  2025"
pub fn mtime_str(ts: u64) -> String {
    let dt: DateTime<Local> = match Utc.timestamp_opt(ts as i64, 0) {
        LocalResult::Single(utc) => utc.with_timezone(&Local),
        _ => return "?".to_string(),
    };

    let now = Local::now();
    let six_months_ago = now - chrono::Duration::days(180);

    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun",
        "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let mon = MONTHS[(dt.month() - 1) as usize];
    let day = dt.day();

    if dt > six_months_ago {
        format!("{} {:2} {:02}:{:02}", mon, day, dt.hour(), dt.minute())
    } else {
        format!("{} {:2}  {}", mon, day, dt.year())
    }
}

/// SFTP v3 longname: "-rw-r--r--    1 1000  1000        3 Jun 22 15:30 foo"
pub fn long_name(
    name: &str,
    permissions: Option<u32>,
    uid: Option<u32>,
    gid: Option<u32>,
    size: Option<u64>,
    mtime: Option<u64>,
) -> String {
    let id = |v: Option<u32>| v.map(|v| v.to_string()).unwrap_or_else(|| "?".to_string());
    format!("{:10} {:>4} {:<5} {:<5} {:>8} {:12} {}",
        permissions.map(permission_str).unwrap_or_else(|| "----------".to_string()),
        1,
        id(uid),
        id(gid),
        size.unwrap_or(0),
        mtime.map(mtime_str).unwrap_or_else(|| "?".to_string()),
        name,
    )
}

// ── 경로 유틸 ────────────────────────────────────────────────────────────────

/// 요청 경로를 "/" 기준 가상 경로로 정규화 (어휘적 처리, 파일시스템 조회 없음)
///
/// - 절대/상대 구분 없이 "/" 아래로 해석
/// - ".." 은 상위로, 단 "/" 위로는 못 올라감
/// - "."  은 무시
pub fn normalize_path(path: &str) -> PathBuf {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part)                  => parts.push(part),
            Component::ParentDir                     => { parts.pop(); }
            Component::CurDir                        => {}
            Component::RootDir | Component::Prefix(_) => parts.clear(),
        }
    }
    let mut normalized = PathBuf::from("/");
    normalized.extend(parts);
    normalized
}

/// 루트 아래 실제 경로. 결과는 항상 root로 시작
pub fn resolve_under(root: &Path, path: &str) -> PathBuf {
    let virtual_path = normalize_path(path);
    match virtual_path.strip_prefix("/") {
        Ok(relative) => root.join(relative),
        Err(_)       => root.to_path_buf(),
    }
}

// ── 프로세스 유틸 ────────────────────────────────────────────────────────────

/// 종료 상태 → exit-status 값 (시그널 종료는 128 + signal)
pub fn exit_code(status: &std::process::ExitStatus) -> u32 {
    if let Some(code) = status.code() {
        return code as u32;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal as u32;
        }
    }
    1
}
