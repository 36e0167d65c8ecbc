use std::collections::HashSet;
use std::fmt::Debug;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream};
use tokio::stream::StreamExt;
use tungstenite::Message;

use nettrick_game::model::Card;
use nettrick_game::protocol::{JoinRequest, PlayCardRequest, Request, Response};
use nettrick_game::server;
use nettrick_server::{run, settings};

async fn send<S>(stream: &mut S, req: Request)
where
    S: Sink<Message> + Unpin,
    S::Error: Debug,
{
    let json = serde_json::to_string(&req).expect("serialization to work");
    stream
        .send(Message::text(json))
        .await
        .expect("server to be up");
}

async fn next_response<S>(stream: &mut S) -> Response
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let msg = stream
            .next()
            .await
            .expect("server to respond")
            .expect("response to be successful");
        if msg.is_text() {
            let text = msg.into_text().expect("response to be text");
            return serde_json::from_str(&text).expect("deserialization to work");
        }
    }
}

async fn expect_notice<S>(stream: &mut S, text: &str)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    match next_response(stream).await {
        Response::Message(m) => assert_eq!(m.message, text),
        other => panic!("expected notice {:?}, got {:?}", text, other),
    }
}

async fn expect_play<S>(stream: &mut S, player_id: usize, card: Card)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    match next_response(stream).await {
        Response::PlayCard(pc) => {
            assert_eq!(pc.player_id, player_id);
            assert_eq!(pc.card, card);
        }
        other => panic!("expected a played card, got {:?}", other),
    }
}

// Drive a whole round-opening over real WebSockets: four seats, a deal,
// an in-turn play, a rejected play, and a latecomer turned away.
#[tokio::test(core_threads = 4)]
async fn four_players_open_a_round() {
    flexi_logger::Logger::with_env()
        .format(|w, now, r| flexi_logger::with_thread(w, now, r))
        .start()
        .expect("logger to start");
    // Spawn server.
    let bind_addr = "127.0.0.1:8081";
    let client_bind_addr = "ws://127.0.0.1:8081/table";
    let settings = settings::Server {
        bind_addr: bind_addr.into(),
    };
    let (shutdown_tx, shutdown_rx) = piper::chan(0);
    let game = server::Settings::default();
    let server = tokio::spawn(async move { run(settings, game, shutdown_rx).await.ok() });

    // Hack: wait a bit for the server to be ready.
    tokio::time::delay_for(Duration::from_millis(150)).await;

    // Seat four players, one after another, each waiting for its own join
    // notice so the roster order is fixed.
    let mut clients = Vec::new();
    for i in 0..4 {
        let (mut stream, _) = tokio_tungstenite::connect_async(client_bind_addr)
            .await
            .expect("server to accept");
        send(
            &mut stream,
            JoinRequest {
                name: format!("player-{}", i),
            }
            .into(),
        )
        .await;
        expect_notice(&mut stream, &format!("player-{} joined the game", i)).await;
        clients.push(stream);
    }
    // Earlier seats also heard about the later arrivals.
    for (i, stream) in clients.iter_mut().enumerate() {
        for j in (i + 1)..4 {
            expect_notice(stream, &format!("player-{} joined the game", j)).await;
        }
    }

    // Any connected client may start; the first seat does.
    send(&mut clients[0], Request::Start).await;
    let mut hands = Vec::new();
    for stream in clients.iter_mut() {
        let hand = match next_response(stream).await {
            Response::Cards(c) => c.cards,
            other => panic!("expected a dealt hand, got {:?}", other),
        };
        assert_eq!(hand.len(), 13);
        expect_notice(stream, "Game started!").await;
        expect_notice(stream, "Player 1's turn").await;
        hands.push(hand);
    }
    // The four hands partition the deck.
    let union: HashSet<Card> = hands.iter().flatten().copied().collect();
    assert_eq!(union.len(), 52);

    // Seat 0 leads a card it holds; the whole table sees it.
    let led = hands[0][0];
    send(&mut clients[0], PlayCardRequest { card: led }.into()).await;
    for stream in clients.iter_mut() {
        expect_play(stream, 0, led).await;
        expect_notice(stream, "Player 2's turn").await;
    }

    // Seat 1 tries the card seat 0 just played: a private advisory, and the
    // turn does not move.
    send(&mut clients[1], PlayCardRequest { card: led }.into()).await;
    expect_notice(&mut clients[1], "You do not have that card.").await;

    // Seat 1 follows with a card it does hold.
    let followed = hands[1][0];
    send(&mut clients[1], PlayCardRequest { card: followed }.into()).await;
    for stream in clients.iter_mut() {
        expect_play(stream, 1, followed).await;
        expect_notice(stream, "Player 3's turn").await;
    }

    // A latecomer can connect, but cannot be seated mid-game.
    let (mut latecomer, _) = tokio_tungstenite::connect_async(client_bind_addr)
        .await
        .expect("server to accept");
    send(
        &mut latecomer,
        JoinRequest {
            name: "latecomer".into(),
        }
        .into(),
    )
    .await;
    expect_notice(
        &mut latecomer,
        "Game already started. Please wait for the next game.",
    )
    .await;

    // Tell server to shutdown.
    drop(shutdown_tx);
    let stats = server
        .await
        .expect("server shutdown smoothly")
        .expect("server shutdown smoothly");

    assert_eq!(stats.total_accepted_connections, 5);
    drop(latecomer);
    drop(clients);
}
