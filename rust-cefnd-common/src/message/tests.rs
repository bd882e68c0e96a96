//! Unit tests for the message codec

use super::*;

#[test]
fn test_name_creation() {
    let name = Name::from_string("ccnx:/test/data/1");

    assert_eq!(name.len(), 3);
    assert_eq!(name.get(0).unwrap().as_bytes().as_ref(), b"test");
    assert_eq!(name.get(2).unwrap().as_bytes().as_ref(), b"1");
    assert_eq!(name.to_string(), "/test/data/1");
    assert_eq!(Name::new().to_string(), "/");
}

#[test]
fn test_name_compare() {
    let name1 = Name::from_string("/a/b/c");
    let name2 = Name::from_string("/a/b/c");
    let name3 = Name::from_string("/a/b/d");
    let name4 = Name::from_string("/a/b");

    assert_eq!(name1, name2);
    assert_ne!(name1, name3);
    assert_ne!(name1, name4);

    assert!(name4.is_prefix_of(&name1));
    assert!(!name1.is_prefix_of(&name4));
    assert!(!name3.is_prefix_of(&name1));
    assert_eq!(name1.prefix(2), name4);
}

#[test]
fn test_interest_packet() {
    let name = Name::from_string("/a/b");
    let msg = MessageBuilder::interest(name.clone())
        .chunk(7)
        .hop_limit(5)
        .nonce(42)
        .lifetime(Duration::from_millis(2500))
        .build()
        .unwrap();

    assert_eq!(msg.kind, MessageKind::Interest);
    assert_eq!(msg.name, name);
    assert_eq!(msg.chunk, Some(7));
    assert_eq!(msg.hop_limit, 5);
    assert_eq!(msg.nonce, Some(42));
    assert_eq!(msg.fingerprint(), 42);
    assert_eq!(msg.lifetime, Some(Duration::from_millis(2500)));
    assert_eq!(msg.interest_type, InterestType::Regular);
    assert!(!msg.signed);
}

#[test]
fn test_interest_subtypes() {
    let symbolic = MessageBuilder::interest(Name::from_string("/video"))
        .symbolic()
        .build()
        .unwrap();
    assert_eq!(symbolic.interest_type, InterestType::Symbolic);
    assert_eq!(symbolic.chunk, None);

    let selective = MessageBuilder::interest(Name::from_string("/video"))
        .selective(10, 3)
        .build()
        .unwrap();
    assert_eq!(selective.interest_type, InterestType::Selective);
    let range = selective.selective.unwrap();
    assert_eq!(range.chunks().collect::<Vec<_>>(), vec![10, 11, 12]);
}

#[test]
fn test_object_packet() {
    let name = Name::from_string("/test/data");
    let key = [7u8; DIGEST_LEN];
    let msg = MessageBuilder::object(name.clone(), &b"Hello, CCN!"[..])
        .chunk(0)
        .key_id(key)
        .expiry(1_000)
        .build()
        .unwrap();

    assert_eq!(msg.kind, MessageKind::ContentObject);
    assert_eq!(msg.name, name);
    assert_eq!(msg.payload.as_deref(), Some(&b"Hello, CCN!"[..]));
    assert_eq!(msg.key_id, Some(key));
    assert_eq!(msg.expiry, Some(1_000));
    assert!(msg.signed);
}

#[test]
fn test_restrictions_parse() {
    let msg = MessageBuilder::interest(Name::from_string("/r"))
        .key_id_restriction([1; DIGEST_LEN])
        .object_hash_restriction([2; DIGEST_LEN])
        .build()
        .unwrap();
    assert_eq!(msg.key_id_restriction, Some([1; DIGEST_LEN]));
    assert_eq!(msg.object_hash_restriction, Some([2; DIGEST_LEN]));
}

#[test]
fn test_hop_limit_rewrite_and_interest_return() {
    let msg = MessageBuilder::interest(Name::from_string("/a"))
        .hop_limit(5)
        .build()
        .unwrap();

    let rewritten = Message::parse(msg.with_hop_limit(4)).unwrap();
    assert_eq!(rewritten.hop_limit, 4);
    assert_eq!(rewritten.body(), msg.body());

    let ret = Message::parse(msg.to_interest_return(ReturnCode::NoRoute)).unwrap();
    assert_eq!(ret.kind, MessageKind::InterestReturn);
    assert_eq!(ret.return_code, Some(ReturnCode::NoRoute));
    assert_eq!(ret.name, msg.name);
}

#[test]
fn test_object_hash_is_stable_across_hops() {
    let msg = MessageBuilder::object(Name::from_string("/h"), &b"x"[..])
        .hop_limit(3)
        .build()
        .unwrap();
    let again = Message::parse(msg.with_hop_limit(9)).unwrap();
    assert_eq!(msg.object_hash(), again.object_hash());
}

#[test]
fn test_parse_rejects_bad_packets() {
    let raw = MessageBuilder::interest(Name::from_string("/a")).encode().unwrap();

    // truncated
    assert!(Message::parse(raw.slice(..raw.len() - 1)).is_err());

    // wrong version
    let mut bad = raw.to_vec();
    bad[0] = 2;
    assert!(Message::parse(Bytes::from(bad)).is_err());

    // packet type that does not match the message TLV
    let mut bad = raw.to_vec();
    bad[1] = PacketType::ContentObject as u8;
    assert!(Message::parse(Bytes::from(bad)).is_err());
}

#[test]
fn test_fnv_distinguishes_bodies() {
    assert_ne!(fnv1a_64(b"/a"), fnv1a_64(b"/b"));
    assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
}
