use bytes::Bytes;

use super::*;

#[test]
fn test_decode_integers() {
    assert_eq!(decode(b"i0e").unwrap(), Value::Int(0));
    assert_eq!(decode(b"i-17e").unwrap(), Value::Int(-17));
    assert_eq!(decode(b"i6881e").unwrap(), Value::Int(6881));
}

#[test]
fn test_decode_rejects_non_canonical_integers() {
    assert_eq!(decode(b"i-0e"), Err(BencodeError::InvalidInteger(1)));
    assert_eq!(decode(b"i007e"), Err(BencodeError::InvalidInteger(1)));
    assert_eq!(decode(b"ie"), Err(BencodeError::InvalidInteger(1)));
    assert_eq!(decode(b"i1x2e"), Err(BencodeError::InvalidInteger(1)));
}

#[test]
fn test_decode_krpc_ping() {
    let value = decode(b"d1:ad2:id20:abcdefghij0123456789e1:q4:ping1:t2:aa1:y1:qe").unwrap();

    assert_eq!(value.get_str(b"y"), Some("q"));
    assert_eq!(value.get_str(b"q"), Some("ping"));
    let args = value.get(b"a").unwrap();
    assert_eq!(
        args.get_bytes(b"id").map(|b| b.as_ref()),
        Some(b"abcdefghij0123456789".as_slice())
    );
}

#[test]
fn test_decode_shares_input_buffer() {
    let data = Bytes::from_static(b"l4:spam4:eggse");
    let value = decode_bytes(data.clone()).unwrap();

    let list = value.as_list().unwrap();
    let spam = list[0].as_bytes().unwrap();
    assert_eq!(spam.as_ptr(), data[3..].as_ptr());
}

#[test]
fn test_decode_errors() {
    assert_eq!(decode(b""), Err(BencodeError::UnexpectedEof(0)));
    assert_eq!(decode(b"5:abc"), Err(BencodeError::UnexpectedEof(5)));
    assert_eq!(decode(b"l4:spam"), Err(BencodeError::UnexpectedEof(7)));
    assert_eq!(decode(b"i1ei2e"), Err(BencodeError::TrailingData(3)));
    assert_eq!(decode(b"di1e1:ae"), Err(BencodeError::NonStringKey(1)));
    assert_eq!(
        decode(b"x"),
        Err(BencodeError::UnexpectedByte {
            byte: b'x',
            offset: 0
        })
    );
}

#[test]
fn test_decode_nesting_limit() {
    let mut deep = vec![b'l'; 100];
    deep.extend(vec![b'e'; 100]);
    assert!(matches!(
        decode(&deep),
        Err(BencodeError::NestingTooDeep(_))
    ));
}

#[test]
fn test_encode_sorts_dictionary_keys() {
    let value = Value::dict([
        (&b"y"[..], Value::str("r")),
        (&b"t"[..], Value::bytes(Bytes::from_static(b"\x00\x01"))),
        (&b"r"[..], Value::dict([(&b"id"[..], Value::str("x"))])),
    ]);

    assert_eq!(
        encode(&value).as_ref(),
        b"d1:rd2:id1:xe1:t2:\x00\x011:y1:re"
    );
}

#[test]
fn test_encode_list_and_integers() {
    let value = Value::List(vec![Value::Int(201), Value::str("A Generic Error Ocurred")]);
    assert_eq!(encode(&value).as_ref(), b"li201e23:A Generic Error Ocurrede");
}

#[test]
fn test_reencode_is_identical() {
    let original: &[u8] = b"d1:rd2:id20:mnopqrstuvwxyz1234565:token8:aoeusnthe1:t2:aa1:y1:re";
    let value = decode(original).unwrap();
    assert_eq!(encode(&value).as_ref(), original);
}
