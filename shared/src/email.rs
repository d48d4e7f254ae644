use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use aws_sdk_sesv2::Client as SesClient;

/// Send invitation email via AWS SES
pub async fn send_invitation_email(
    ses_client: &SesClient,
    from_address: &str,
    to_email: &str,
    recipient_name: &str,
    accept_url: &str,
) -> Result<(), String> {
    let html_body = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <style>
        body {{
            font-family: 'HelveticaNeue', Helvetica, Arial, sans-serif;
            line-height: 1.6;
            color: #333333;
            background: #ffffff;
            margin: 0;
            padding: 0;
        }}
        .wrapper {{
            max-width: 600px;
            margin: 0 auto;
            padding: 60px 20px;
        }}
        .container {{
            background: #ffffff;
            border: 1px solid #e5e5e5;
            padding: 60px 50px;
        }}
        .logo {{
            font-size: 24px;
            font-weight: 300;
            color: #000000;
            margin: 0 0 40px 0;
            text-align: center;
            letter-spacing: -0.5px;
        }}
        .title {{
            font-size: 20px;
            font-weight: 300;
            color: #000000;
            margin: 0 0 24px 0;
        }}
        .text {{
            font-size: 15px;
            font-weight: 400;
            color: #333333;
            margin: 0 0 24px 0;
            line-height: 1.6;
        }}
        .button-wrapper {{
            text-align: center;
            margin: 32px 0;
        }}
        .button {{
            display: inline-block;
            width: 100%;
            max-width: 280px;
            padding: 18px 24px;
            background: #2563eb;
            color: #ffffff;
            text-decoration: none;
            font-weight: 400;
            font-size: 15px;
            text-align: center;
            box-sizing: border-box;
        }}
        .footer {{
            margin-top: 48px;
            padding-top: 24px;
            border-top: 1px solid #e5e5e5;
            font-size: 13px;
            font-weight: 300;
            color: #666666;
            text-align: center;
        }}
        @media only screen and (max-width: 600px) {{
            .container {{
                padding: 40px 24px;
            }}
            .wrapper {{
                padding: 40px 16px;
            }}
        }}
    </style>
</head>
<body>
    <div class="wrapper">
        <div class="container">
            <h1 class="logo">SiteDocs</h1>

            <h2 class="title">You've been invited</h2>

            <p class="text">
                Hi {name}, you've been invited to join SiteDocs document control.
                Click the button below to set your password and activate your account.
            </p>

            <div class="button-wrapper">
                <a href="{url}" class="button">Accept Invitation</a>
            </div>

            <p class="text" style="margin-top: 32px; font-size: 13px; color: #666666;">
                This invitation expires in 7 days. If you didn't expect this, you can safely ignore this email.
            </p>

            <div class="footer">
                <p>© 2026 SiteDocs</p>
            </div>
        </div>
    </div>
</body>
</html>"#,
        name = recipient_name,
        url = accept_url
    );

    let text_body = format!(
        r#"SiteDocs

You've been invited

Hi {name}, you've been invited to join SiteDocs document control. Open the link below to set your password and activate your account:

{url}

This invitation expires in 7 days. If you didn't expect this, you can safely ignore this email.

© 2026 SiteDocs"#,
        name = recipient_name,
        url = accept_url
    );

    let destination = Destination::builder().to_addresses(to_email).build();

    let subject = Content::builder()
        .data("You've been invited to join SiteDocs")
        .charset("UTF-8")
        .build()
        .map_err(|e| format!("Failed to build subject: {:?}", e))?;

    let html_content = Content::builder()
        .data(html_body)
        .charset("UTF-8")
        .build()
        .map_err(|e| format!("Failed to build HTML content: {:?}", e))?;

    let text_content = Content::builder()
        .data(text_body)
        .charset("UTF-8")
        .build()
        .map_err(|e| format!("Failed to build text content: {:?}", e))?;

    let body = Body::builder().html(html_content).text(text_content).build();

    let message = Message::builder().subject(subject).body(body).build();

    let email_content = EmailContent::builder().simple(message).build();

    ses_client
        .send_email()
        .from_email_address(from_address)
        .destination(destination)
        .content(email_content)
        .send()
        .await
        .map_err(|e| format!("Failed to send email: {:?}", e))?;

    Ok(())
}
