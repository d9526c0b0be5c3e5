//! Product page snippets modelled on real shop markup.

/// A page and the image the extractor should pick from it.
#[derive(Debug, Clone)]
pub struct ProductPageFixture {
    pub page_url: &'static str,
    pub html: &'static str,
    pub expected_image: Option<&'static str>,
    pub description: &'static str,
}

pub const PRODUCT_PAGES: &[ProductPageFixture] = &[
    ProductPageFixture {
        page_url: "https://shop.example.com/women/dresses/linen-midi",
        html: r#"<html><head>
            <meta property="og:title" content="Linen midi dress">
            <meta property="og:image" content="https://cdn.shop.example.com/p/linen-midi-1200.jpg">
            </head><body><img src="/static/logo.svg"></body></html>"#,
        expected_image: Some("https://cdn.shop.example.com/p/linen-midi-1200.jpg"),
        description: "Open Graph metadata wins over page images",
    },
    ProductPageFixture {
        page_url: "https://store.example.org/item/4411?color=navy",
        html: r#"<html><body>
            <header><img class="site-logo" src="/img/logo.png"></header>
            <div class="gallery">
              <img class="product-gallery__image" data-src="//media.example.org/4411/navy.webp">
            </div></body></html>"#,
        expected_image: Some("https://media.example.org/4411/navy.webp"),
        description: "Lazy-loaded product image with protocol-relative data-src",
    },
    ProductPageFixture {
        page_url: "https://boutique.example.net/collections/knit/cardigan",
        html: r#"<html><body>
            <img src="/icons/cart-icon.png">
            <img src="/avatars/avatar-12.jpg">
            <img src="images/cardigan-front.jpg" alt="Cardigan">
            </body></html>"#,
        expected_image: Some("https://boutique.example.net/collections/knit/images/cardigan-front.jpg"),
        description: "First non-chrome image, path-relative",
    },
    ProductPageFixture {
        page_url: "https://blog.example.com/post",
        html: r#"<html><body><img src="data:image/gif;base64,R0lGOD"><img src="/spacer.gif"></body></html>"#,
        expected_image: None,
        description: "Only placeholders on the page",
    },
];
