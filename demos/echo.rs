//! An echo bot that repeats anything addressed to it, either as a PRIVMSG or when mentioned by
//! nick in a channel. Adapted from the teacher's own `libtiny_client/examples/echo.rs`, updated
//! for the `Client`/`EventSink` API.

use std::process::exit;

use irc_core::{ChanNameRef, ChannelEventSink, Client, EngineConfig, Event, MessageTarget, ServerEntry};

fn main() {
    env_logger::init();

    // echo <nick> <server> <port> [<chan_1> ... <chan_N>]
    let mut args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        show_usage();
        exit(1);
    }

    let nick = args.remove(1);
    let server = args.remove(1);
    let port_str = args.remove(1);
    let port: u16 = match port_str.parse() {
        Ok(port) => port,
        Err(err) => {
            println!("Can't parse port: {:?}", port_str);
            println!("{}", err);
            exit(1);
        }
    };

    let chans: Vec<_> = args[1..].iter().map(|c| ChanNameRef::new(c).to_owned()).collect();

    let mut config = EngineConfig::new(nick.clone(), nick.clone(), "echo bot", vec![nick.clone()]);
    config.servers.push(ServerEntry::new(server, port));
    config.auto_join = chans.into_iter().map(|c| (c, None)).collect();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(echo_bot_task(config));
}

fn show_usage() {
    println!("echo <nick> <server> <port> [<chan_1> .. <chan_N>]");
}

static NICK_SEP: [&str; 4] = [": ", ", ", ":", ","];

async fn echo_bot_task(config: EngineConfig) {
    let client = Client::new(config);
    let (tx, mut rx) = tokio::sync::mpsc::channel(100);

    let run_client = client.clone();
    tokio::spawn(async move {
        if let Err(err) = run_client.start(ChannelEventSink::new(tx)).await {
            println!("Client stopped: {}", err);
        }
    });

    while let Some(ev) = rx.recv().await {
        println!("Client event: {:?}", ev);
        if let Event::Message { from, target, text } = ev {
            let echo = match target {
                MessageTarget::User(_) => Some((from.nick, text)),
                MessageTarget::Chan(chan) => {
                    let our_nick = client.current_nick();
                    if let Some(rest) = text.strip_prefix(&our_nick) {
                        let mut rest = rest;
                        for sep in NICK_SEP.iter() {
                            if let Some(stripped) = rest.strip_prefix(sep) {
                                rest = stripped;
                                break;
                            }
                        }
                        Some((chan.display().to_owned(), rest.to_owned()))
                    } else {
                        None
                    }
                }
            };

            if let Some((target, msg)) = echo {
                client.privmsg(&target, &msg);
            }
        }
    }
}
