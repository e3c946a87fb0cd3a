use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use packets::{CursorBuffer, NextState, ReadPacket, WritePacket};
use packets::{handshake, login, status};
use std::fmt::Debug;
use uuid::uuid;

fn rw_packet<T>(packet: &T)
where
    T: PartialEq + Eq + ReadPacket + WritePacket + Debug,
{
    let mut buffer = CursorBuffer::new();
    packet.write_to_buffer(&mut buffer);
    T::read_from_buffer(&mut buffer).expect("failed to read packet");
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("rw");
    let user_id = uuid!("09879557-e479-45a9-b434-a56377674627");

    group.bench_function(BenchmarkId::new("handshake::serverbound::HandshakePacket", 0), |b| {
        let packet = handshake::serverbound::HandshakePacket {
            protocol_version: 754,
            server_address: "mc.justchunks.net".to_string(),
            server_port: 25565,
            next_state: NextState::Login,
        };
        b.iter(|| rw_packet(&packet))
    });

    group.bench_function(BenchmarkId::new("status::clientbound::StatusResponsePacket", 0), |b| {
        let packet = status::clientbound::StatusResponsePacket {
            body: "{\"description\":{\"text\":\"A Quarry Server\"}}".to_string(),
        };
        b.iter(|| rw_packet(&packet))
    });

    group.bench_function(BenchmarkId::new("status::clientbound::PongPacket", 0), |b| {
        let packet = status::clientbound::PongPacket { payload: 100 };
        b.iter(|| rw_packet(&packet))
    });

    group.bench_function(BenchmarkId::new("login::clientbound::EncryptionRequestPacket", 0), |b| {
        let packet = login::clientbound::EncryptionRequestPacket {
            server_id: String::new(),
            public_key: vec![0u8; 162],
            verify_token: [0u8; 4],
        };
        b.iter(|| rw_packet(&packet))
    });

    group.bench_function(BenchmarkId::new("login::clientbound::LoginSuccessPacket", 0), |b| {
        let packet = login::clientbound::LoginSuccessPacket {
            user_id,
            user_name: "Hydrofin".to_string(),
        };
        b.iter(|| rw_packet(&packet))
    });

    group.bench_function(BenchmarkId::new("login::serverbound::LoginStartPacket", 0), |b| {
        let packet = login::serverbound::LoginStartPacket {
            user_name: "Hydrofin".to_string(),
        };
        b.iter(|| rw_packet(&packet))
    });

    group.bench_function(BenchmarkId::new("login::serverbound::EncryptionResponsePacket", 0), |b| {
        let packet = login::serverbound::EncryptionResponsePacket {
            shared_secret: vec![0u8; 128],
            verify_token: vec![0u8; 128],
        };
        b.iter(|| rw_packet(&packet))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
