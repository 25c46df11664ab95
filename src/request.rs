use bytes::Bytes;
use http::Method;
use http::header::CONTENT_TYPE;
use serde::Serialize;

use crate::client::Client;
use crate::config::RequestOption;
use crate::context::Context;
use crate::error::Error;
use crate::multipart::MultipartForm;
use crate::response::HttpResponse;

const APPLICATION_JSON: &str = "application/json";
const APPLICATION_FORM: &str = "application/x-www-form-urlencoded";

impl Client {
    pub async fn get<I>(&self, ctx: &Context, url: &str, options: I) -> crate::Result<HttpResponse>
    where
        I: IntoIterator<Item = RequestOption>,
    {
        self.execute(ctx, Method::GET, url, None, options).await
    }

    pub async fn head<I>(&self, ctx: &Context, url: &str, options: I) -> crate::Result<HttpResponse>
    where
        I: IntoIterator<Item = RequestOption>,
    {
        self.execute(ctx, Method::HEAD, url, None, options).await
    }

    pub async fn post<I>(
        &self,
        ctx: &Context,
        url: &str,
        body: Option<Bytes>,
        options: I,
    ) -> crate::Result<HttpResponse>
    where
        I: IntoIterator<Item = RequestOption>,
    {
        self.execute(ctx, Method::POST, url, body, options).await
    }

    pub async fn put<I>(
        &self,
        ctx: &Context,
        url: &str,
        body: Option<Bytes>,
        options: I,
    ) -> crate::Result<HttpResponse>
    where
        I: IntoIterator<Item = RequestOption>,
    {
        self.execute(ctx, Method::PUT, url, body, options).await
    }

    pub async fn patch<I>(
        &self,
        ctx: &Context,
        url: &str,
        body: Option<Bytes>,
        options: I,
    ) -> crate::Result<HttpResponse>
    where
        I: IntoIterator<Item = RequestOption>,
    {
        self.execute(ctx, Method::PATCH, url, body, options).await
    }

    pub async fn delete<I>(
        &self,
        ctx: &Context,
        url: &str,
        body: Option<Bytes>,
        options: I,
    ) -> crate::Result<HttpResponse>
    where
        I: IntoIterator<Item = RequestOption>,
    {
        self.execute(ctx, Method::DELETE, url, body, options).await
    }

    pub async fn options<I>(
        &self,
        ctx: &Context,
        url: &str,
        options: I,
    ) -> crate::Result<HttpResponse>
    where
        I: IntoIterator<Item = RequestOption>,
    {
        self.execute(ctx, Method::OPTIONS, url, None, options).await
    }

    pub async fn connect<I>(
        &self,
        ctx: &Context,
        url: &str,
        options: I,
    ) -> crate::Result<HttpResponse>
    where
        I: IntoIterator<Item = RequestOption>,
    {
        self.execute(ctx, Method::CONNECT, url, None, options).await
    }

    pub async fn trace<I>(&self, ctx: &Context, url: &str, options: I) -> crate::Result<HttpResponse>
    where
        I: IntoIterator<Item = RequestOption>,
    {
        self.execute(ctx, Method::TRACE, url, None, options).await
    }

    /// `POST` with a JSON body; the content type overrides any caller header.
    pub async fn post_json<T, I>(
        &self,
        ctx: &Context,
        url: &str,
        payload: &T,
        options: I,
    ) -> crate::Result<HttpResponse>
    where
        T: Serialize + ?Sized,
        I: IntoIterator<Item = RequestOption>,
    {
        let body = serde_json::to_vec(payload).map_err(|source| Error::SerializeJson { source })?;
        let options = with_content_type(options, APPLICATION_JSON);
        self.execute(ctx, Method::POST, url, Some(Bytes::from(body)), options)
            .await
    }

    pub async fn post_form<T, I>(
        &self,
        ctx: &Context,
        url: &str,
        payload: &T,
        options: I,
    ) -> crate::Result<HttpResponse>
    where
        T: Serialize + ?Sized,
        I: IntoIterator<Item = RequestOption>,
    {
        let encoded =
            serde_urlencoded::to_string(payload).map_err(|source| Error::SerializeForm { source })?;
        let options = with_content_type(options, APPLICATION_FORM);
        self.execute(ctx, Method::POST, url, Some(Bytes::from(encoded)), options)
            .await
    }

    /// `POST` with a `multipart/form-data` body.
    ///
    /// An empty form fails with [`Error::EmptyMultipart`] before any network work.
    pub async fn post_multipart<I>(
        &self,
        ctx: &Context,
        url: &str,
        form: &MultipartForm,
        options: I,
    ) -> crate::Result<HttpResponse>
    where
        I: IntoIterator<Item = RequestOption>,
    {
        let encoded = form.encode()?;
        let options = with_content_type(options, &encoded.content_type);
        self.execute(ctx, Method::POST, url, Some(encoded.body), options)
            .await
    }
}

fn with_content_type<I>(options: I, content_type: &str) -> Vec<RequestOption>
where
    I: IntoIterator<Item = RequestOption>,
{
    let mut options = options.into_iter().collect::<Vec<_>>();
    options.push(RequestOption::header(CONTENT_TYPE.as_str(), content_type));
    options
}
