//! Output pipeline (spec §4.4): a raw sink, a flood-control writer task, and stateless façades
//! (IRC/CAP/DCC) built over it. Three layers sharing one writer and one lock, same shape as
//! `libtiny_client::main_loop`'s single outgoing-message channel — we only add the timing gate
//! that channel never needed.

use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::sleep;

use irc_core_common::ChanNameRef;

use crate::config::WebircAuth;

/// An outbound line plus whether it's allowed to skip the flood-control delay.
enum OutMsg {
    /// PING/PONG replies and caller-marked "now" lines: written immediately, and does not reset
    /// the flood-control clock (so a burst of bypass lines can't stall the queued ones behind
    /// them any longer than necessary).
    Now(String),
    /// Subject to `message_delay` spacing from the previous non-bypass send.
    Queued(String),
}

/// Raw sink, shared by every façade. Cheap to clone: it's just a channel handle.
#[derive(Clone)]
pub struct Raw {
    tx: mpsc::Sender<OutMsg>,
    max_line_length: usize,
}

impl Raw {
    pub(crate) fn new(tx: mpsc::Sender<OutMsg>, max_line_length: usize) -> Raw {
        Raw { tx, max_line_length }
    }

    /// Writes immediately, bypassing the flood-control delay.
    pub fn raw_line_now(&self, line: String) {
        self.send(OutMsg::Now(self.prepare(line)));
    }

    /// Enqueues behind the flood-control delay.
    pub fn raw_line(&self, line: String) {
        self.send(OutMsg::Queued(self.prepare(line)));
    }

    /// Strips embedded line breaks and truncates to `max_line_length - 2` (room for the CRLF the
    /// writer task appends), on a char boundary (testable property 5).
    fn prepare(&self, mut line: String) -> String {
        line.retain(|c| c != '\n' && c != '\r');
        let limit = self.max_line_length.saturating_sub(2);
        if line.len() > limit {
            let mut end = limit;
            while end > 0 && !line.is_char_boundary(end) {
                end -= 1;
            }
            line.truncate(end);
        }
        line
    }

    fn send(&self, msg: OutMsg) {
        if let Err(err) = self.tx.try_send(msg) {
            debug!("dropping outbound line, writer lagging or closed: {:?}", err);
        }
    }
}

/// Drains `rx` onto `sink`, spacing non-bypass sends by at least `message_delay`. Runs until the
/// channel closes (the connection shut down) or a write fails (caller observes this as the read
/// loop hitting EOF shortly after, per spec §7's note on output errors).
pub(crate) async fn spawn_writer<W>(mut sink: W, mut rx: mpsc::Receiver<OutMsg>, message_delay: Duration)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut last_sent: Option<Instant> = None;
    while let Some(msg) = rx.recv().await {
        let line = match msg {
            OutMsg::Now(line) => line,
            OutMsg::Queued(line) => {
                if let Some(last) = last_sent {
                    let elapsed = last.elapsed();
                    if elapsed < message_delay {
                        sleep(message_delay - elapsed).await;
                    }
                }
                last_sent = Some(Instant::now());
                line
            }
        };
        let mut framed = line;
        framed.push_str("\r\n");
        if let Err(err) = sink.write_all(framed.as_bytes()).await {
            debug!("writer task: write failed, stopping: {:?}", err);
            return;
        }
    }
}

/// IRC command façade: builds a line via `irc_core_wire` and hands it to the raw sink.
pub struct IrcFacade {
    raw: Raw,
}

impl IrcFacade {
    pub(crate) fn new(raw: Raw) -> IrcFacade {
        IrcFacade { raw }
    }

    pub fn join(&self, chan: &ChanNameRef, key: Option<&str>) {
        self.raw
            .raw_line(irc_core_wire::join_with_keys(&[(chan.display(), key)]));
    }

    pub fn part(&self, chan: &ChanNameRef, reason: Option<&str>) {
        self.raw.raw_line(irc_core_wire::part(chan.display(), reason));
    }

    pub fn privmsg(&self, target: &str, msg: &str) {
        self.raw.raw_line(irc_core_wire::privmsg(target, msg));
    }

    pub fn action(&self, target: &str, msg: &str) {
        self.raw.raw_line(irc_core_wire::action(target, msg));
    }

    pub fn notice(&self, target: &str, msg: &str) {
        self.raw.raw_line(irc_core_wire::notice(target, msg));
    }

    pub fn whois(&self, nick: &str) {
        self.raw.raw_line(irc_core_wire::whois(nick));
    }

    pub fn who(&self, mask: &str) {
        self.raw.raw_line(irc_core_wire::who(mask));
    }

    pub fn names(&self, chan: &ChanNameRef) {
        self.raw.raw_line(irc_core_wire::names(chan.display()));
    }

    pub fn mode(&self, target: &str, modestring: &str, args: &[&str]) {
        self.raw.raw_line(irc_core_wire::mode(target, modestring, args));
    }

    pub fn topic(&self, chan: &ChanNameRef, topic: Option<&str>) {
        self.raw.raw_line(irc_core_wire::topic(chan.display(), topic));
    }

    pub fn kick(&self, chan: &ChanNameRef, nick: &str, reason: Option<&str>) {
        self.raw.raw_line(irc_core_wire::kick(chan.display(), nick, reason));
    }

    pub fn invite(&self, nick: &str, chan: &ChanNameRef) {
        self.raw.raw_line(irc_core_wire::invite(nick, chan.display()));
    }

    pub fn nick(&self, new_nick: &str) {
        self.raw.raw_line(irc_core_wire::nick(new_nick));
    }

    pub fn away(&self, msg: Option<&str>) {
        self.raw.raw_line(irc_core_wire::away(msg));
    }

    pub fn quit(&self, reason: Option<String>) {
        self.raw.raw_line(irc_core_wire::quit(reason));
    }

    /// Registration lines (spec §4.1 step 5). Sent once per connection attempt, ahead of anything
    /// flood-controlled, so the server doesn't keep a half-registered client waiting behind a
    /// queue it doesn't know about yet.
    pub(crate) fn pass_now(&self, password: &str) {
        self.raw.raw_line_now(irc_core_wire::pass(password));
    }

    pub(crate) fn user_now(&self, login: &str, realname: &str) {
        self.raw.raw_line_now(irc_core_wire::user(login, realname));
    }

    pub(crate) fn nick_now(&self, nick: &str) {
        self.raw.raw_line_now(irc_core_wire::nick(nick));
    }

    /// `WEBIRC password gateway hostname address` — not part of `irc_core_wire`'s line grammar
    /// since it's a gateway-to-server preamble rather than a client/server protocol line.
    pub(crate) fn webirc_now(&self, auth: &WebircAuth) {
        self.raw.raw_line_now(format!(
            "WEBIRC {} {} {} {}",
            auth.password, auth.username, auth.hostname, auth.address
        ));
    }

    /// Replies to a server PING with the same argument. Bypasses the flood queue (spec §4.3).
    pub(crate) fn pong_now(&self, server: &str) {
        self.raw.raw_line_now(irc_core_wire::pong(server));
    }

    /// The read loop's own liveness probe (spec §4.2), also bypassing the flood queue.
    pub(crate) fn ping_now(&self, arg: &str) {
        self.raw.raw_line_now(irc_core_wire::ping(arg));
    }
}

/// CAP negotiation façade. ACK/NAK arrive as inbound lines and are surfaced through `InputParser`
/// instead — this only covers the outbound half.
pub struct CapFacade {
    raw: Raw,
}

impl CapFacade {
    pub(crate) fn new(raw: Raw) -> CapFacade {
        CapFacade { raw }
    }

    pub fn ls(&self) {
        self.raw.raw_line_now(irc_core_wire::cap_ls());
    }

    pub fn req(&self, capabilities: &[&str]) {
        self.raw.raw_line_now(irc_core_wire::cap_req(capabilities));
    }

    pub fn end(&self) {
        self.raw.raw_line_now(irc_core_wire::cap_end());
    }

    pub fn authenticate(&self, param: &str) {
        self.raw.raw_line_now(irc_core_wire::authenticate(param));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn raw(max_line_length: usize) -> (Raw, mpsc::Receiver<OutMsg>) {
        let (tx, rx) = mpsc::channel(16);
        (Raw::new(tx, max_line_length), rx)
    }

    #[test]
    fn prepare_strips_embedded_line_breaks() {
        let (raw, _rx) = raw(512);
        assert_eq!(raw.prepare("PRIVMSG #chan :hi\r\nthere\n".to_owned()), "PRIVMSG #chan :hithere");
    }

    #[test]
    fn prepare_truncates_to_max_line_length_minus_crlf() {
        let (raw, _rx) = raw(10);
        // limit is 10 - 2 = 8 bytes
        assert_eq!(raw.prepare("0123456789".to_owned()), "01234567");
    }

    #[test]
    fn prepare_truncates_on_a_char_boundary() {
        let (raw, _rx) = raw(10);
        // "résumé" -> bytes: r(1) é(2) s(1) u(1) m(1) é(2) = 8 bytes, limit is 8: boundary falls
        // mid-character on a naive byte truncate, so this exercises the char-boundary backoff.
        let truncated = raw.prepare("résumé!!".to_owned());
        assert!(truncated.len() <= 8);
        assert!(truncated.is_char_boundary(truncated.len()));
    }

    #[tokio::test]
    async fn raw_line_now_bypasses_the_flood_queue() {
        let (raw, rx) = raw(512);
        raw.raw_line_now("PONG server".to_owned());
        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(spawn_writer(client, rx, Duration::from_secs(60)));
        let mut buf = vec![0u8; 64];
        let n = tokio::time::timeout(Duration::from_millis(200), server.read(&mut buf))
            .await
            .expect("writer should not be delayed by flood control")
            .unwrap();
        assert_eq!(&buf[..n], b"PONG server\r\n");
    }

    #[tokio::test]
    async fn queued_lines_are_spaced_by_at_least_message_delay() {
        let (raw, rx) = raw(512);
        raw.raw_line("first".to_owned());
        raw.raw_line("second".to_owned());
        let delay = Duration::from_millis(120);
        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(spawn_writer(client, rx, delay));

        let mut buf = vec![0u8; 64];
        let t0 = Instant::now();
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"first\r\n");

        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"second\r\n");
        // testable property 4: consecutive non-bypass sends are at least `message_delay` apart.
        assert!(t0.elapsed() >= delay);
    }
}
