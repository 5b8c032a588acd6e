//! Server-to-client strings.
//!
//! Existing clients match on these byte for byte, so they live in one place.

pub const LOGIN_SUCCESS: &str = "success";
pub const LOGIN_FAIL: &str = "fail";
pub const REGISTER_SUCCESS: &str = "register_success";

pub const REASON_USER_EXISTS: &str = "用户名已存在";
pub const REASON_BAD_FORMAT: &str = "格式错误";
pub const REASON_INVALID_CREDENTIAL: &str = "用户名或密码无效";
pub const REASON_SERVER_ERROR: &str = "服务器错误";

pub const INVALID_IMAGE: &str = "图片数据无效";
pub const MALFORMED_CHUNK_HEADER: &str = "无效的图片传输标记";

pub fn register_failed(reason: &str) -> String {
    format!("register_failed:{reason}")
}

/// `[<display name>]：<text>`
pub fn broadcast(display_name: &str, text: &str) -> String {
    format!("[{display_name}]：{text}")
}

/// `[<sender>] 私聊说: <text>`
pub fn private(sender: &str, text: &str) -> String {
    format!("[{sender}] 私聊说: {text}")
}

pub fn recipient_not_found(recipient: &str) -> String {
    format!("用户 [{recipient}] 不在线/不存在/为匿名用户")
}

pub fn malformed_private(raw: &str) -> String {
    format!("无效的私聊格式: {raw}")
}

pub fn unknown_command(raw: &str) -> String {
    format!("未知命令: {raw}")
}

/// Single-frame answer to `@@list`.
pub fn online_users<S: AsRef<str>>(names: &[S]) -> String {
    let names: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
    format!("在线用户：{}", names.join(" "))
}

pub fn anonymity_changed(anonymous: bool) -> String {
    format!("已切换到 {} 聊天模式", mode_label(anonymous))
}

pub fn mode_label(anonymous: bool) -> &'static str {
    if anonymous {
        "匿名"
    } else {
        "实名"
    }
}

pub fn joined(username: &str) -> String {
    format!("{username} 加入了聊天室")
}

pub fn left(username: &str) -> String {
    format!("{username} 退出了聊天室")
}

pub fn quit_requested(username: &str) -> String {
    format!("{username} 请求退出聊天室")
}

/// Header embedded in the first slice of an outgoing image.
pub fn image_header(sender: &str) -> String {
    format!("[IMG]{sender}|")
}
