// tests/unit_eval_test.rs

mod common;

use bytes::Bytes;
use citrinedb::core::commands::generic::{Eval, EvalSha, Script, ScriptSubcommand};
use citrinedb::core::scripting::ScriptRegistry;
use citrinedb::core::{CitrineError, Command, RespValue};
use common::TestContext;

fn eval(script: &'static str) -> Command {
    Command::Eval(Eval {
        script: Bytes::from_static(script.as_bytes()),
        num_keys: 0,
        keys: vec![],
        args: vec![],
    })
}

#[tokio::test]
async fn test_eval_returns_lua_values() {
    let ctx = TestContext::new().await;
    assert_eq!(
        ctx.execute(eval("return 1 + 1")).await.unwrap(),
        RespValue::Integer(2)
    );
    assert_eq!(
        ctx.execute(eval("return 'hello'")).await.unwrap(),
        RespValue::BulkString(Bytes::from_static(b"hello"))
    );
    assert_eq!(ctx.execute(eval("return nil")).await.unwrap(), RespValue::Null);
    assert_eq!(
        ctx.execute(eval("return {1, 2, 3}")).await.unwrap(),
        RespValue::Array(vec![
            RespValue::Integer(1),
            RespValue::Integer(2),
            RespValue::Integer(3),
        ])
    );
}

#[tokio::test]
async fn test_eval_sees_keys_and_argv() {
    let ctx = TestContext::new().await;
    let reply = ctx
        .execute(Command::Eval(Eval {
            script: Bytes::from_static(b"return KEYS[1] .. '=' .. ARGV[1]"),
            num_keys: 1,
            keys: vec![Bytes::from_static(b"color")],
            args: vec![Bytes::from_static(b"blue")],
        }))
        .await
        .unwrap();
    assert_eq!(reply, RespValue::BulkString(Bytes::from_static(b"color=blue")));
}

#[tokio::test]
async fn test_eval_store_api_mutates_database() {
    let ctx = TestContext::new().await;
    ctx.execute(eval("store.set('lua-key', 'lua-value')"))
        .await
        .unwrap();
    assert_eq!(
        ctx.db.get(&Bytes::from_static(b"lua-key")).unwrap().data,
        Bytes::from_static(b"lua-value")
    );

    let reply = ctx
        .execute(eval("return store.get('lua-key')"))
        .await
        .unwrap();
    assert_eq!(reply, RespValue::BulkString(Bytes::from_static(b"lua-value")));

    ctx.execute(eval("store.del('lua-key')")).await.unwrap();
    assert!(ctx.db.get(&Bytes::from_static(b"lua-key")).is_none());
}

#[tokio::test]
async fn test_eval_registers_script_for_evalsha() {
    let ctx = TestContext::new().await;
    let body = b"return 7";
    ctx.execute(eval("return 7")).await.unwrap();

    let sha = ScriptRegistry::digest(body);
    let reply = ctx
        .execute(Command::EvalSha(EvalSha {
            sha1: sha,
            num_keys: 0,
            keys: vec![],
            args: vec![],
        }))
        .await
        .unwrap();
    assert_eq!(reply, RespValue::Integer(7));
}

#[tokio::test]
async fn test_evalsha_unknown_digest() {
    let ctx = TestContext::new().await;
    let err = ctx
        .execute(Command::EvalSha(EvalSha {
            sha1: "0000000000000000000000000000000000000000".to_string(),
            num_keys: 0,
            keys: vec![],
            args: vec![],
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, CitrineError::NoScript));
}

#[tokio::test]
async fn test_script_load_exists_flush() {
    let ctx = TestContext::new().await;
    let reply = ctx
        .execute(Command::Script(Script {
            subcommand: ScriptSubcommand::Load(Bytes::from_static(b"return 42")),
        }))
        .await
        .unwrap();
    let sha = match reply {
        RespValue::BulkString(sha) => String::from_utf8(sha.to_vec()).unwrap(),
        other => panic!("expected digest, got {other:?}"),
    };
    assert_eq!(sha, ScriptRegistry::digest(b"return 42"));

    let reply = ctx
        .execute(Command::Script(Script {
            subcommand: ScriptSubcommand::Exists(vec![sha.clone(), "ffff".to_string()]),
        }))
        .await
        .unwrap();
    assert_eq!(
        reply,
        RespValue::Array(vec![RespValue::Integer(1), RespValue::Integer(0)])
    );

    ctx.execute(Command::Script(Script {
        subcommand: ScriptSubcommand::Flush,
    }))
    .await
    .unwrap();
    assert!(!ctx.state.scripting.exists(&sha));
}

#[tokio::test]
async fn test_script_error_surfaces() {
    let ctx = TestContext::new().await;
    let err = ctx.execute(eval("this is not lua")).await.unwrap_err();
    assert!(matches!(err, CitrineError::ScriptError(_)));
}
