use std::io::Write;

use hndigest::error::DigestError;
use hndigest::scraping::{Extractor, HtmlExtractor};

fn paragraphs(count: usize) -> String {
    let mut html = String::from("<html><body>");
    for i in 0..count {
        html.push_str(&format!("<p>Paragraph number {} of the article.</p>", i));
    }
    html.push_str("</body></html>");
    html
}

#[tokio::test]
async fn extracts_article_text() {
    let mut server = mockito::Server::new_async().await;
    let page = server
        .mock("GET", "/post")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body("<html><body><nav>menu</nav><article><p>The real story.</p></article></body></html>")
        .create_async()
        .await;

    let extractor = HtmlExtractor::new(5, "hndigest-test").unwrap();
    let text = extractor.extract(&format!("{}/post", server.url())).await.unwrap();

    page.assert_async().await;
    assert!(text.contains("The real story."));
    assert!(!text.contains("menu"));
}

#[tokio::test]
async fn declared_oversized_page_is_refused() {
    let mut server = mockito::Server::new_async().await;
    let _page = server
        .mock("GET", "/huge")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(paragraphs(100))
        .create_async()
        .await;

    let extractor = HtmlExtractor::new(5, "hndigest-test")
        .unwrap()
        .with_max_page_bytes(256);
    let err = extractor
        .extract(&format!("{}/huge", server.url()))
        .await
        .unwrap_err();
    assert!(matches!(err, DigestError::Parse(_)), "got {:?}", err);
}

#[tokio::test]
async fn undeclared_body_is_read_up_to_the_limit() {
    let mut server = mockito::Server::new_async().await;
    let body = paragraphs(100);
    let _page = server
        .mock("GET", "/stream")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_chunked_body(move |w| w.write_all(body.as_bytes()))
        .create_async()
        .await;

    let extractor = HtmlExtractor::new(5, "hndigest-test")
        .unwrap()
        .with_max_page_bytes(400);
    let text = extractor
        .extract(&format!("{}/stream", server.url()))
        .await
        .unwrap();

    assert!(text.contains("Paragraph number 0 "));
    assert!(!text.contains("Paragraph number 99 "));
}

#[tokio::test]
async fn non_html_and_error_statuses_fail() {
    let mut server = mockito::Server::new_async().await;
    let _pdf = server
        .mock("GET", "/paper.pdf")
        .with_status(200)
        .with_header("content-type", "application/pdf")
        .with_body("%PDF-1.7")
        .create_async()
        .await;
    let _gone = server
        .mock("GET", "/gone")
        .with_status(503)
        .create_async()
        .await;

    let extractor = HtmlExtractor::new(5, "hndigest-test").unwrap();
    let err = extractor
        .extract(&format!("{}/paper.pdf", server.url()))
        .await
        .unwrap_err();
    assert!(matches!(err, DigestError::Parse(_)));
    let err = extractor.extract(&format!("{}/gone", server.url())).await.unwrap_err();
    assert!(matches!(err, DigestError::Unavailable(_)));
}
