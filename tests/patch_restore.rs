//! 补丁/恢复引擎的端到端测试
//!
//! 核心性质：恢复是补丁的左逆——任意apply序列之后restore_all，
//! 文档序列化结果与翻译前完全一致，两种模式都成立。

use pagelingo::config::TranslationMode;
use pagelingo::html::dom::{find_nodes, text_content};
use pagelingo::html::serializer::serialize_document;

mod common;

use common::{MockChatClient, TestEnvironment};

fn serialize(env: &TestEnvironment) -> String {
    String::from_utf8_lossy(&serialize_document(env.translator.dom(), String::new())).to_string()
}

/// 替换模式：翻译后恢复，文档逐字节回到原样
#[tokio::test]
async fn test_replace_restore_roundtrip() {
    let html = "<html><body>\
                <h2>Heading text here</h2>\
                <p>plain paragraph body</p>\
                <p>mixed <b>bold inline</b> tail text</p>\
                <p><em>lone inline unit</em></p>\
                </body></html>";
    let env = TestEnvironment::new(html, MockChatClient::new());
    let before = serialize(&env);

    let success = env
        .translator
        .translate_page(TranslationMode::Replace, "zh-CN")
        .await
        .unwrap();
    assert!(success);
    assert_ne!(serialize(&env), before, "document must actually change");

    env.translator.restore_all();
    assert_eq!(serialize(&env), before, "restore must be a left inverse");
}

/// 对照模式：原文始终不动，悬浮块随恢复整体消失
#[tokio::test]
async fn test_compare_restore_roundtrip() {
    let html = "<html><body>\
                <p>first original paragraph</p>\
                <p>second original paragraph</p>\
                </body></html>";
    let env = TestEnvironment::new(html, MockChatClient::new());
    let before = serialize(&env);

    let success = env
        .translator
        .translate_page(TranslationMode::Compare, "zh-CN")
        .await
        .unwrap();
    assert!(success);

    let translated = serialize(&env);
    assert!(translated.contains("pagelingo-overlay"));
    // 原文段落原样保留
    for p in find_nodes(&env.translator.dom().document, vec!["p"]) {
        let text = text_content(&p);
        if text.starts_with("译:") {
            continue; // 悬浮块镜像里的段落
        }
        assert!(text.contains("original paragraph"));
    }

    env.translator.restore_all();
    assert_eq!(serialize(&env), before);
}

/// 同一单元反复应用与两种模式先后使用都可恢复
#[tokio::test]
async fn test_interleaved_runs_always_restorable() {
    let html = "<html><body><p>resilient source text</p></body></html>";
    let env = TestEnvironment::new(html, MockChatClient::new());
    let before = serialize(&env);

    env.translator
        .translate_page(TranslationMode::Compare, "zh-CN")
        .await
        .unwrap();
    // 第二轮换模式：run自身会先还原上一轮
    env.translator
        .translate_page(TranslationMode::Replace, "zh-CN")
        .await
        .unwrap();
    assert!(!serialize(&env).contains("pagelingo-overlay"));

    env.translator.restore_all();
    assert_eq!(serialize(&env), before);
}
